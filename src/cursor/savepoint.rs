use super::BaseCursor;
use crate::core::{Params, Result};
use uuid::Uuid;

/// A named rollback point inside the current transaction of a cursor.
///
/// `SAVEPOINT` is issued at construction. Dropping a savepoint that was not
/// closed rolls back to it.
///
/// The flushing variant flushes pending writes before the savepoint is set,
/// clears transaction-local state when rolling back, and flushes again when
/// released; if that last flush fails the savepoint is rolled back instead
/// and the error returned.
pub struct Savepoint<'c, C: BaseCursor + ?Sized> {
    cr: &'c mut C,
    name: String,
    flush: bool,
    closed: bool,
}

impl<'c, C: BaseCursor + ?Sized> Savepoint<'c, C> {
    pub fn new(cr: &'c mut C, flush: bool) -> Result<Self> {
        let name = open(cr, flush)?;
        Ok(Self {
            cr,
            name,
            flush,
            closed: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The cursor the savepoint was set on.
    pub fn cursor(&mut self) -> &mut C {
        &mut *self.cr
    }

    /// Releases the savepoint, rolling back to it first if asked. A no-op
    /// once closed.
    pub fn close(&mut self, rollback: bool) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.flush {
            close_flushing(self.cr, &self.name, rollback)
        } else {
            close(self.cr, &self.name, rollback)
        }
    }

    pub fn release(mut self) -> Result<()> {
        self.close(false)
    }

    pub fn rollback(mut self) -> Result<()> {
        self.close(true)
    }
}

impl<C: BaseCursor + ?Sized> Drop for Savepoint<'_, C> {
    fn drop(&mut self) {
        if !self.closed
            && let Err(e) = self.close(true)
        {
            log::error!(
                target: "ormregistry::sql_db",
                "rolling back dropped savepoint {}: {e}",
                self.name
            );
        }
    }
}

/// Sets a new uniquely named savepoint on `cr` and returns its name.
pub(crate) fn open<C: BaseCursor + ?Sized>(cr: &mut C, flush: bool) -> Result<String> {
    if flush {
        cr.flush()?;
    }
    let name = format!("\"{}\"", Uuid::new_v4());
    cr.execute(&format!("SAVEPOINT {name}"), &Params::None)?;
    Ok(name)
}

pub(crate) fn close<C: BaseCursor + ?Sized>(cr: &mut C, name: &str, rollback: bool) -> Result<()> {
    if rollback {
        cr.execute(&format!("ROLLBACK TO SAVEPOINT {name}"), &Params::None)?;
    }
    cr.execute(&format!("RELEASE SAVEPOINT {name}"), &Params::None)?;
    Ok(())
}

fn close_flushing<C: BaseCursor + ?Sized>(cr: &mut C, name: &str, rollback: bool) -> Result<()> {
    let flushed = if rollback { Ok(()) } else { cr.flush() };
    match flushed {
        Ok(()) => {
            if rollback {
                cr.clear();
            }
            close(cr, name, rollback)
        }
        Err(e) => {
            cr.clear();
            if let Err(close_err) = close(cr, name, true) {
                log::error!(
                    target: "ormregistry::sql_db",
                    "rolling back savepoint {name} after failed flush: {close_err}"
                );
            }
            Err(e)
        }
    }
}

/// Runs `f` inside a savepoint: released when `f` succeeds, rolled back
/// when it fails.
pub fn with_savepoint<C, T>(cr: &mut C, flush: bool, f: impl FnOnce(&mut C) -> Result<T>) -> Result<T>
where
    C: BaseCursor + ?Sized,
{
    let mut savepoint = Savepoint::new(cr, flush)?;
    match f(savepoint.cursor()) {
        Ok(value) => {
            savepoint.close(false)?;
            Ok(value)
        }
        Err(e) => {
            if let Err(close_err) = savepoint.close(true) {
                log::error!(
                    target: "ormregistry::sql_db",
                    "rolling back savepoint {}: {close_err}",
                    savepoint.name
                );
            }
            Err(e)
        }
    }
}
