use std::{
    fmt::{self, Debug, Formatter},
    ops::Deref,
};

use crate::{pool::PoolConnection, Result};

/// An in-progress database transaction holding a pooled connection for
/// the caller's exclusive use.
///
/// Starts with [`Client::transaction`][crate::Client::transaction]. A
/// transaction should end with a call to [`commit`] or [`rollback`]; if
/// neither is called before it goes out of scope, [`rollback`] happens on
/// drop. The connection returns to the pool on every path.
///
/// Statements run inside a transaction go straight to the pinned
/// connection — they bypass the executor and its priority queue, since a
/// transaction must keep one connection across multiple statements.
///
/// [`commit`]: Self::commit
/// [`rollback`]: Self::rollback
pub struct Transaction {
    conn: Option<PoolConnection>,
    open: bool,
}

const EXPECT_MSG: &str = "BUG: transaction connection already taken!";

impl Transaction {
    pub(crate) async fn begin(conn: PoolConnection) -> Result<Self> {
        conn.begin().await?;

        Ok(Self {
            conn: Some(conn),
            open: true,
        })
    }

    /// Commit the transaction and return the connection to the pool.
    pub async fn commit(mut self) -> Result<()> {
        self.conn.as_ref().expect(EXPECT_MSG).commit().await?;
        self.open = false;

        if let Some(conn) = self.conn.take() {
            conn.release().await;
        }

        Ok(())
    }

    /// Abort the transaction and return the connection to the pool.
    pub async fn rollback(mut self) -> Result<()> {
        self.conn.as_ref().expect(EXPECT_MSG).rollback().await?;
        self.open = false;

        if let Some(conn) = self.conn.take() {
            conn.release().await;
        }

        Ok(())
    }
}

impl Deref for Transaction {
    type Target = PoolConnection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect(EXPECT_MSG)
    }
}

impl Debug for Transaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("open", &self.open)
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.open {
            if let Some(conn) = &self.conn {
                conn.start_rollback().ok();
            }
        }
        // the remaining PoolConnection drop returns it to the pool
    }
}
