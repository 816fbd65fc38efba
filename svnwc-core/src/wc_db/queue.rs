//! Work-queue storage
//!
//! Items are skels appended in FIFO order. A working copy with queued
//! items was not closed cleanly; the runner in `crate::workqueue` drains it.

use super::{WcDb, queue_work_items};
use crate::error::Result;
use crate::skel::Skel;
use bytes::Bytes;
use rusqlite::{OptionalExtension, params};
use tracing::debug;

impl WcDb {
    /// Append one work item in its own transaction.
    pub fn add_work_queue(&self, item: &Skel) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        queue_work_items(&tx, std::slice::from_ref(item))?;
        tx.commit()?;
        Ok(())
    }

    /// The oldest pending item, if any.
    pub fn fetch_work_queue(&self) -> Result<Option<(i64, Skel)>> {
        let conn = self.conn()?;
        let row: Option<(i64, Vec<u8>)> = conn
            .query_row("SELECT id, work FROM WORK_QUEUE ORDER BY id LIMIT 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;
        match row {
            Some((id, work)) => Ok(Some((id, Skel::parse(Bytes::from(work))?))),
            None => Ok(None),
        }
    }

    pub fn completed_work_queue(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM WORK_QUEUE WHERE id = ?1", params![id])?;
        debug!("Completed work item {}", id);
        Ok(())
    }

    pub fn work_queue_len(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM WORK_QUEUE", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::new_wc;
    use crate::error::WcError;

    #[test]
    fn test_fifo_order() {
        let (_dir, db) = new_wc();
        let first = crate::workqueue::WorkItem::FileRemove { relpath: "a".into() }.to_skel();
        let second = crate::workqueue::WorkItem::PristineCleanup.to_skel();
        db.add_work_queue(&first).unwrap();
        db.add_work_queue(&second).unwrap();
        assert_eq!(db.work_queue_len().unwrap(), 2);

        let (id, item) = db.fetch_work_queue().unwrap().unwrap();
        assert_eq!(item, first);
        db.completed_work_queue(id).unwrap();
        let (_, item) = db.fetch_work_queue().unwrap().unwrap();
        assert_eq!(item, second);
    }

    #[test]
    fn test_unknown_item_rejected() {
        let (_dir, db) = new_wc();
        let bogus = crate::skel::Skel::parse(bytes::Bytes::from_static(b"(frobnicate x)")).unwrap();
        assert!(matches!(db.add_work_queue(&bogus), Err(WcError::MalformedData(_))));
        assert!(db.fetch_work_queue().unwrap().is_none());
    }
}
