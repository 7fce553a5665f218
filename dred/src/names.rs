//! Turning raw enumeration values and name pointers into something printable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use dred_common::traits::EnumSchema;

/// The name reported for a value no enumerant has.
pub const UNKNOWN_ENUM_NAME: &str = "Unknown";

/// A cache of `value -> name` tables, one per [`EnumSchema`].
///
/// A table is built the first time a schema is asked about and never invalidated.
#[derive(Debug, Default)]
pub struct EnumNames {
    tables: Mutex<HashMap<&'static str, HashMap<u32, &'static str>>>,
    builds: AtomicUsize,
}

impl EnumNames {
    pub fn new() -> EnumNames {
        EnumNames::default()
    }

    /// The name of the enumerant of `S` with value `raw`, or `"Unknown"`.
    pub fn name<S: EnumSchema>(&self, raw: u32) -> &'static str {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let table = tables.entry(S::NAME).or_insert_with(|| {
            self.builds.fetch_add(1, Ordering::Relaxed);
            S::ENUMERANTS
                .iter()
                .map(|&(name, value)| (value, name))
                .collect()
        });
        table.get(&raw).copied().unwrap_or(UNKNOWN_ENUM_NAME)
    }

    /// How many tables have been built so far.
    pub fn tables_built(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }
}

/// Look up an enumerant name in the process-wide [`EnumNames`] cache.
///
/// ```
/// use dred::format::D3D12_AUTO_BREADCRUMB_OP;
/// use dred::names::enum_name;
///
/// assert_eq!(
///     enum_name::<D3D12_AUTO_BREADCRUMB_OP>(6),
///     "D3D12_AUTO_BREADCRUMB_OP_DISPATCH"
/// );
/// assert_eq!(enum_name::<D3D12_AUTO_BREADCRUMB_OP>(9999), "Unknown");
/// ```
pub fn enum_name<S: EnumSchema>(raw: u32) -> &'static str {
    static NAMES: OnceLock<EnumNames> = OnceLock::new();
    NAMES.get_or_init(EnumNames::new).name::<S>(raw)
}

/// A reference to a NUL-terminated string in process memory.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NameRef {
    Narrow(u64),
    Wide(u64),
}

/// Pick which of the two encodings of a debug name to read.
///
/// The runtime stores most names twice, once as a narrow string and once as a wide string.
/// Either pointer may be null. The narrow one wins when both are set.
pub fn select_name(narrow: u64, wide: u64) -> Option<NameRef> {
    if narrow != 0 {
        Some(NameRef::Narrow(narrow))
    } else if wide != 0 {
        Some(NameRef::Wide(wide))
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use dred_common::errors::HRESULT;
    use dred_common::format::{D3D12_DRED_ALLOCATION_TYPE, D3D12_DRED_DEVICE_STATE};

    #[test]
    fn test_select_name() {
        assert_eq!(select_name(0, 0x2000), Some(NameRef::Wide(0x2000)));
        assert_eq!(select_name(0x1000, 0x2000), Some(NameRef::Narrow(0x1000)));
        assert_eq!(select_name(0x1000, 0), Some(NameRef::Narrow(0x1000)));
        assert_eq!(select_name(0, 0), None);
    }

    #[test]
    fn test_enum_names() {
        let names = EnumNames::new();
        assert_eq!(
            names.name::<D3D12_DRED_ALLOCATION_TYPE>(34),
            "D3D12_DRED_ALLOCATION_TYPE_RESOURCE"
        );
        assert_eq!(
            names.name::<D3D12_DRED_ALLOCATION_TYPE>(0xffffffff),
            "D3D12_DRED_ALLOCATION_TYPE_INVALID"
        );
        // 26 is a hole in the table.
        assert_eq!(names.name::<D3D12_DRED_ALLOCATION_TYPE>(26), "Unknown");
        assert_eq!(
            names.name::<D3D12_DRED_DEVICE_STATE>(7),
            "D3D12_DRED_DEVICE_STATE_PAGEFAULT"
        );
        assert_eq!(
            names.name::<HRESULT>(0x887a0006),
            "DXGI_ERROR_DEVICE_HUNG"
        );
    }

    #[test]
    fn test_tables_built_once() {
        let names = EnumNames::new();
        assert_eq!(names.tables_built(), 0);
        for raw in 0..100 {
            names.name::<D3D12_DRED_DEVICE_STATE>(raw);
        }
        assert_eq!(names.tables_built(), 1);
        names.name::<HRESULT>(0);
        names.name::<D3D12_DRED_DEVICE_STATE>(3);
        assert_eq!(names.tables_built(), 2);
    }
}
