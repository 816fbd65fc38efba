//! DAV resource URIs
//!
//! A Subversion DAV server exposes versioned content at plain paths and
//! everything else below a special `!svn` segment:
//!
//! | URI below the repository      | kind                  |
//! |-------------------------------|-----------------------|
//! | `path`                        | `Regular`             |
//! | `!svn`                        | `RootCollection`      |
//! | `!svn/me`, `!svn/rev`, ...    | `Private`             |
//! | `!svn/ver/REV/path`           | `Version`             |
//! | `!svn/bc/REV/path`            | `BaselineCollection`  |
//! | `!svn/bln/REV`                | `Baseline`            |
//! | `!svn/wrk/ACTIVITY/path`      | `Working`             |
//! | `!svn/wbl/ACTIVITY/REV`       | `WorkingBaseline`     |
//! | `!svn/act/ACTIVITY`           | `Activity`            |
//! | `!svn/his/path`               | `History`             |
//! | `!svn/vcc/default`            | `Vcc`                 |

use crate::{DavError, Result};
use std::collections::{HashMap, HashSet};
use svnwc_core::relpath;

pub const SPECIAL_URI: &str = "!svn";
pub const DEFAULT_VCC_NAME: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Regular,
    Version,
    BaselineCollection,
    Baseline,
    Working,
    WorkingBaseline,
    Activity,
    History,
    Vcc,
    RootCollection,
    Private,
}

impl ResourceKind {
    /// Kind named by the segment after `!svn`.
    fn from_segment(segment: &str) -> Option<ResourceKind> {
        match segment {
            "act" => Some(ResourceKind::Activity),
            "bc" => Some(ResourceKind::BaselineCollection),
            "bln" => Some(ResourceKind::Baseline),
            "his" => Some(ResourceKind::History),
            "ver" => Some(ResourceKind::Version),
            "vcc" => Some(ResourceKind::Vcc),
            "wbl" => Some(ResourceKind::WorkingBaseline),
            "wrk" => Some(ResourceKind::Working),
            _ => None,
        }
    }
}

/// A request URI split into its DAV meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUri {
    pub context: String,
    pub uri: String,
    pub kind: ResourceKind,
    pub revision: Option<i64>,
    /// Repository path, always with a leading `/`.
    pub path: Option<String>,
    pub activity_id: Option<String>,
    pub versioned: bool,
    pub baselined: bool,
    pub working: bool,
}

fn standardize(path: &str) -> String {
    format!("/{}", path.trim_matches('/'))
}

/// First segment and the remainder of a `/`-separated path.
fn head(path: &str) -> (&str, &str) {
    let path = path.trim_start_matches('/');
    match path.find('/') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => (path, ""),
    }
}

impl ResourceUri {
    /// Classify `uri`, the request path below the repository `context`.
    pub fn parse(context: &str, uri: &str) -> Result<ResourceUri> {
        Self::parse_with_label(context, uri, None, false)
    }

    /// As [`parse`](Self::parse), honouring a `Label` header revision and
    /// the checked-in flag for the version controlled configuration.
    pub fn parse_with_label(
        context: &str,
        uri: &str,
        label: Option<&str>,
        use_checked_in: bool,
    ) -> Result<ResourceUri> {
        let mut resource = ResourceUri {
            context: context.to_string(),
            uri: uri.to_string(),
            kind: ResourceKind::Regular,
            revision: None,
            path: None,
            activity_id: None,
            versioned: false,
            baselined: false,
            working: false,
        };
        let (first, special) = head(uri);
        if first != SPECIAL_URI {
            resource.path = Some(standardize(uri));
            resource.versioned = true;
            return Ok(resource);
        }
        let special = special.trim_start_matches('/');
        if special.is_empty() {
            resource.kind = ResourceKind::RootCollection;
            return Ok(resource);
        }
        if !special.ends_with('/') && relpath::depth(special) == 1 {
            resource.kind = ResourceKind::Private;
            return Ok(resource);
        }
        let (segment, parameter) = head(special);
        let kind = ResourceKind::from_segment(segment)
            .ok_or_else(|| DavError::IllegalUrl(resource.request_uri()))?;
        resource.kind = kind;
        let parameter = parameter.trim_start_matches('/');
        match kind {
            ResourceKind::Vcc => resource.parse_vcc(parameter, label, use_checked_in)?,
            ResourceKind::Version => {
                resource.versioned = true;
                let (rev, path) = head(parameter);
                resource.revision = Some(resource.parse_revision(rev)?);
                resource.path = Some(standardize(path));
            }
            ResourceKind::Baseline => {
                resource.revision = Some(resource.parse_revision(parameter)?);
                resource.versioned = true;
                resource.baselined = true;
            }
            ResourceKind::BaselineCollection => {
                let (rev, path) = head(parameter);
                resource.revision = Some(resource.parse_revision(rev)?);
                resource.path = Some(standardize(path));
                resource.versioned = true;
            }
            ResourceKind::Activity => resource.activity_id = Some(parameter.to_string()),
            ResourceKind::History => resource.path = Some(standardize(parameter)),
            ResourceKind::WorkingBaseline => {
                resource.working = true;
                resource.versioned = true;
                resource.baselined = true;
                let (activity, rev) = head(parameter);
                if rev.is_empty() {
                    return Err(DavError::IllegalUrl(resource.request_uri()));
                }
                resource.activity_id = Some(activity.to_string());
                resource.revision = Some(resource.parse_revision(rev)?);
            }
            ResourceKind::Working => {
                resource.working = true;
                resource.versioned = true;
                let (activity, path) = head(parameter);
                resource.activity_id = Some(activity.to_string());
                resource.path = Some(standardize(path));
            }
            ResourceKind::Regular | ResourceKind::RootCollection | ResourceKind::Private => {}
        }
        Ok(resource)
    }

    fn parse_vcc(&mut self, parameter: &str, label: Option<&str>, use_checked_in: bool) -> Result<()> {
        if parameter != DEFAULT_VCC_NAME {
            return Err(DavError::IllegalUrl(format!("invalid VCC name '{}'", parameter)));
        }
        self.versioned = true;
        self.baselined = true;
        if label.is_some() || use_checked_in {
            self.revision = label
                .map(|l| l.trim().parse().map_err(|_| DavError::IllegalUrl(format!("invalid label '{}'", l))))
                .transpose()?;
        }
        Ok(())
    }

    fn parse_revision(&self, value: &str) -> Result<i64> {
        value
            .trim_matches('/')
            .parse()
            .map_err(|_| DavError::IllegalUrl(self.request_uri()))
    }

    pub fn request_uri(&self) -> String {
        relpath::url_join(self.context.trim_end_matches('/'), self.uri.trim_start_matches('/'))
    }
}

/// What a resource resolves to against the repository state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedResource {
    pub kind: ResourceKind,
    pub revision: Option<i64>,
    pub path: Option<String>,
    pub exists: bool,
    pub collection: bool,
}

/// Repository facts resource preparation needs.
#[derive(Debug, Clone, Default)]
pub struct PrepareContext {
    pub youngest_revision: i64,
    pub activities: HashSet<String>,
}

pub type ResourceFactory = fn(&ResourceUri, &PrepareContext) -> Result<PreparedResource>;

fn check_revision(uri: &ResourceUri, ctx: &PrepareContext) -> Result<i64> {
    match uri.revision {
        Some(rev) if rev >= 0 && rev <= ctx.youngest_revision => Ok(rev),
        Some(rev) => Err(DavError::IllegalUrl(format!("no such revision {} in '{}'", rev, uri.request_uri()))),
        None => Ok(ctx.youngest_revision),
    }
}

fn prepare_regular(uri: &ResourceUri, ctx: &PrepareContext) -> Result<PreparedResource> {
    Ok(PreparedResource {
        kind: uri.kind,
        revision: Some(check_revision(uri, ctx)?),
        path: uri.path.clone(),
        exists: true,
        collection: false,
    })
}

fn prepare_baseline(uri: &ResourceUri, ctx: &PrepareContext) -> Result<PreparedResource> {
    Ok(PreparedResource {
        kind: uri.kind,
        revision: Some(check_revision(uri, ctx)?),
        path: None,
        exists: true,
        collection: uri.kind == ResourceKind::BaselineCollection,
    })
}

fn prepare_activity(uri: &ResourceUri, ctx: &PrepareContext) -> Result<PreparedResource> {
    let exists = uri.activity_id.as_ref().is_some_and(|id| ctx.activities.contains(id));
    let revision = match uri.kind {
        ResourceKind::WorkingBaseline => Some(check_revision(uri, ctx)?),
        _ => None,
    };
    Ok(PreparedResource { kind: uri.kind, revision, path: uri.path.clone(), exists, collection: false })
}

fn prepare_private(uri: &ResourceUri, _ctx: &PrepareContext) -> Result<PreparedResource> {
    Ok(PreparedResource {
        kind: uri.kind,
        revision: None,
        path: None,
        exists: true,
        collection: uri.kind == ResourceKind::RootCollection,
    })
}

fn prepare_history(uri: &ResourceUri, _ctx: &PrepareContext) -> Result<PreparedResource> {
    Err(DavError::NotImplemented(format!("history resource '{}'", uri.request_uri())))
}

/// Resource preparation keyed by kind, built once and passed to callers.
pub struct ResourceFactories {
    factories: HashMap<ResourceKind, ResourceFactory>,
}

impl ResourceFactories {
    pub fn empty() -> Self {
        Self { factories: HashMap::new() }
    }

    /// The factories for every kind a client meets.
    pub fn standard() -> Self {
        let mut factories = Self::empty();
        factories.register(ResourceKind::Regular, prepare_regular);
        factories.register(ResourceKind::Version, prepare_regular);
        factories.register(ResourceKind::BaselineCollection, prepare_baseline);
        factories.register(ResourceKind::Baseline, prepare_baseline);
        factories.register(ResourceKind::Vcc, prepare_baseline);
        factories.register(ResourceKind::Working, prepare_activity);
        factories.register(ResourceKind::WorkingBaseline, prepare_activity);
        factories.register(ResourceKind::Activity, prepare_activity);
        factories.register(ResourceKind::History, prepare_history);
        factories.register(ResourceKind::RootCollection, prepare_private);
        factories.register(ResourceKind::Private, prepare_private);
        factories
    }

    pub fn register(&mut self, kind: ResourceKind, factory: ResourceFactory) {
        self.factories.insert(kind, factory);
    }

    pub fn prepare(&self, uri: &ResourceUri, ctx: &PrepareContext) -> Result<PreparedResource> {
        let factory = self
            .factories
            .get(&uri.kind)
            .ok_or_else(|| DavError::NotImplemented(format!("no factory for {:?} resources", uri.kind)))?;
        factory(uri, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kinds() {
        let regular = ResourceUri::parse("/repo", "trunk/a.txt").unwrap();
        assert_eq!(regular.kind, ResourceKind::Regular);
        assert_eq!(regular.path.as_deref(), Some("/trunk/a.txt"));

        let version = ResourceUri::parse("/repo", "!svn/ver/12/trunk/a.txt").unwrap();
        assert_eq!(version.kind, ResourceKind::Version);
        assert_eq!(version.revision, Some(12));
        assert_eq!(version.path.as_deref(), Some("/trunk/a.txt"));

        let bc = ResourceUri::parse("/repo", "!svn/bc/7").unwrap();
        assert_eq!((bc.kind, bc.revision, bc.path.as_deref()), (ResourceKind::BaselineCollection, Some(7), Some("/")));

        let wrk = ResourceUri::parse("/repo", "!svn/wrk/abc-123/trunk").unwrap();
        assert_eq!(wrk.activity_id.as_deref(), Some("abc-123"));
        assert!(wrk.working);

        let wbl = ResourceUri::parse("/repo", "!svn/wbl/abc-123/9").unwrap();
        assert_eq!((wbl.kind, wbl.revision), (ResourceKind::WorkingBaseline, Some(9)));

        assert_eq!(ResourceUri::parse("/repo", "!svn").unwrap().kind, ResourceKind::RootCollection);
        assert_eq!(ResourceUri::parse("/repo", "!svn/me").unwrap().kind, ResourceKind::Private);
        assert_eq!(ResourceUri::parse("/repo", "!svn/act/xyz").unwrap().activity_id.as_deref(), Some("xyz"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(ResourceUri::parse("/repo", "!svn/ver/abc/x"), Err(DavError::IllegalUrl(_))));
        assert!(matches!(ResourceUri::parse("/repo", "!svn/wbl/abc-123"), Err(DavError::IllegalUrl(_))));
        assert!(matches!(ResourceUri::parse("/repo", "!svn/vcc/other"), Err(DavError::IllegalUrl(_))));
        assert!(matches!(ResourceUri::parse("/repo", "!svn/zzz/1"), Err(DavError::IllegalUrl(_))));
    }

    #[test]
    fn test_vcc_label() {
        let plain = ResourceUri::parse("/repo", "!svn/vcc/default").unwrap();
        assert_eq!((plain.kind, plain.revision), (ResourceKind::Vcc, None));
        let labelled = ResourceUri::parse_with_label("/repo", "!svn/vcc/default", Some("4"), false).unwrap();
        assert_eq!(labelled.revision, Some(4));
    }

    #[test]
    fn test_prepare_dispatch() {
        let factories = ResourceFactories::standard();
        let ctx = PrepareContext { youngest_revision: 10, activities: ["live".to_string()].into_iter().collect() };

        let head = factories.prepare(&ResourceUri::parse("/repo", "trunk").unwrap(), &ctx).unwrap();
        assert_eq!(head.revision, Some(10));

        let too_new = ResourceUri::parse("/repo", "!svn/ver/11/trunk").unwrap();
        assert!(matches!(factories.prepare(&too_new, &ctx), Err(DavError::IllegalUrl(_))));

        let live = factories.prepare(&ResourceUri::parse("/repo", "!svn/act/live").unwrap(), &ctx).unwrap();
        let dead = factories.prepare(&ResourceUri::parse("/repo", "!svn/act/dead").unwrap(), &ctx).unwrap();
        assert!(live.exists && !dead.exists);

        let bc = factories.prepare(&ResourceUri::parse("/repo", "!svn/bc/3/x").unwrap(), &ctx).unwrap();
        assert!(bc.collection);

        assert!(matches!(
            ResourceFactories::empty().prepare(&ResourceUri::parse("/repo", "x").unwrap(), &ctx),
            Err(DavError::NotImplemented(_))
        ));
    }
}
