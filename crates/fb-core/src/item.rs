use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::attribute::DataAttribute;
use crate::error::ExecResult;
use crate::value::{Value, ValueType};

// ---------------------------------------------------------------------------
// DataItem
// ---------------------------------------------------------------------------

/// The data cell of one output port: a typed payload slot behind a
/// read-write lock, plus the attribute travelling with the current value.
///
/// The lock discipline is the exchange protocol's: the producer holds the
/// write half from reserve until notify, consumers hold read halves from
/// lock until release. The write half is exclusive; readers are many.
#[derive(Debug)]
pub struct DataItem {
    ty: ValueType,
    slot: Arc<RwLock<Value>>,
    attr: Mutex<DataAttribute>,
}

impl DataItem {
    pub fn new(ty: ValueType) -> Self {
        Self {
            ty,
            slot: Arc::new(RwLock::new(Value::default_of(ty))),
            attr: Mutex::new(DataAttribute::new()),
        }
    }

    pub fn value_type(&self) -> ValueType {
        self.ty
    }

    /// Acquire the exclusive write half. Waits for all readers to release.
    pub async fn write_owned(&self) -> OwnedRwLockWriteGuard<Value> {
        Arc::clone(&self.slot).write_owned().await
    }

    /// Acquire a shared read half.
    pub async fn read_owned(&self) -> OwnedRwLockReadGuard<Value> {
        Arc::clone(&self.slot).read_owned().await
    }

    /// Replace the payload through a held write guard, re-checking the tag.
    pub fn store(&self, guard: &mut OwnedRwLockWriteGuard<Value>, value: Value) -> ExecResult<()> {
        if let Err(e) = value.check_type(self.ty) {
            log::warn!("rejecting payload on a {} slot: {e}", self.ty);
            return Err(e);
        }
        **guard = value;
        Ok(())
    }

    pub fn attribute(&self) -> DataAttribute {
        self.attr.lock().expect("attribute lock poisoned").clone()
    }

    pub fn set_attribute(&self, attr: DataAttribute) {
        *self.attr.lock().expect("attribute lock poisoned") = attr;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_enforces_type() {
        let item = DataItem::new(ValueType::Int64);
        let mut w = item.write_owned().await;
        assert!(item.store(&mut w, Value::Int64(42)).is_ok());
        assert!(item.store(&mut w, Value::Str("no".into())).is_err());
        drop(w);

        let r = item.read_owned().await;
        assert_eq!(*r, Value::Int64(42));
    }

    #[tokio::test]
    async fn writer_waits_for_readers() {
        let item = Arc::new(DataItem::new(ValueType::Int32));
        let r = item.read_owned().await;

        let item2 = Arc::clone(&item);
        let writer = tokio::spawn(async move {
            let _w = item2.write_owned().await;
        });

        // The writer cannot complete while the read guard is held.
        tokio::task::yield_now().await;
        assert!(!writer.is_finished());

        drop(r);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn attribute_roundtrip() {
        let item = DataItem::new(ValueType::Str);
        item.set_attribute(DataAttribute::with_sequence(3, 1, false, true));
        assert!(item.attribute().is_end_of(3));
    }
}
