// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Debug;

use range_map::{Range, RangeMap};
use tracing::warn;

use dred_common::format::Layout;

/// Errors a [`MemoryProvider`] reports.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Memory at {address:#x} ({length} bytes) is not mapped")]
    Unmapped { address: u64, length: usize },
    #[error("{name} is not available in module {module}")]
    SymbolUnavailable { module: String, name: String },
}

/// Access to the memory, modules and symbols of a (possibly dead) process.
///
/// Module names passed to these methods are compared the way
/// [`normalize_module_name`] does: case-insensitively and without a `.dll` suffix.
pub trait MemoryProvider {
    /// Read `length` bytes starting at `address`.
    ///
    /// The whole range must be available, a partial read is an error. A range may span
    /// several regions as long as they are contiguous.
    fn read_bytes(&self, address: u64, length: usize) -> Result<Cow<'_, [u8]>, ProviderError>;

    /// The address of the global `symbol` in `module`, if the module's symbols are known.
    fn symbol_address(&self, module: &str, symbol: &str) -> Option<u64>;

    /// The layout of `type_name` as declared by the symbols of `module`.
    fn type_layout(&self, module: &str, type_name: &str) -> Result<Layout, ProviderError>;

    /// The names of all loaded modules, in load order.
    fn modules(&self) -> Vec<String>;
}

impl<P: MemoryProvider + ?Sized> MemoryProvider for &P {
    fn read_bytes(&self, address: u64, length: usize) -> Result<Cow<'_, [u8]>, ProviderError> {
        (**self).read_bytes(address, length)
    }
    fn symbol_address(&self, module: &str, symbol: &str) -> Option<u64> {
        (**self).symbol_address(module, symbol)
    }
    fn type_layout(&self, module: &str, type_name: &str) -> Result<Layout, ProviderError> {
        (**self).type_layout(module, type_name)
    }
    fn modules(&self) -> Vec<String> {
        (**self).modules()
    }
}

/// Reduce a module name or path to the form modules are compared in.
///
/// ```
/// assert_eq!(dred::normalize_module_name(r"C:\Windows\System32\D3D12Core.dll"), "d3d12core");
/// assert_eq!(dred::normalize_module_name("d3d12"), "d3d12");
/// ```
pub fn normalize_module_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let lower = base.to_ascii_lowercase();
    match lower.strip_suffix(".dll") {
        Some(stem) => stem.to_owned(),
        None => lower,
    }
}

/// A contiguous range of memory in a [`MemoryImage`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryRegion {
    /// The address of the first byte of this region.
    pub base_address: u64,
    /// The contents of this region.
    pub bytes: Vec<u8>,
}

impl MemoryRegion {
    fn memory_range(&self) -> Option<Range<u64>> {
        if self.bytes.is_empty() {
            return None;
        }
        Some(Range::new(
            self.base_address,
            self.base_address.checked_add(self.bytes.len() as u64)? - 1,
        ))
    }

    fn get(&self, address: u64, length: usize) -> Option<&[u8]> {
        let start = usize::try_from(address.checked_sub(self.base_address)?).ok()?;
        let end = start.checked_add(length)?;
        self.bytes.get(start..end)
    }
}

/// An owned, in-memory [`MemoryProvider`].
///
/// A `MemoryImage` is a set of non-overlapping memory regions plus what a debugger would
/// know from symbols: the loaded modules, the addresses of their globals and the types they
/// declare.
///
/// # Examples
///
/// ```
/// use dred::{Layout, MemoryImage, MemoryProvider};
///
/// let image = MemoryImage::new()
///     .add_region(0x1000, vec![1, 2, 3, 4])
///     .add_module("d3d12.dll")
///     .add_symbol("d3d12", "D3D12DeviceRemovedExtendedData", 0x1000)
///     .declare_type("d3d12", "D3D12_VERSIONED_DEVICE_REMOVED_EXTENDED_DATA", Layout::default());
/// assert_eq!(&image.read_bytes(0x1001, 2).unwrap()[..], &[2, 3]);
/// assert_eq!(image.symbol_address("D3D12.dll", "D3D12DeviceRemovedExtendedData"), Some(0x1000));
/// ```
#[derive(Debug)]
pub struct MemoryImage {
    regions: Vec<MemoryRegion>,
    regions_by_addr: RangeMap<u64, usize>,
    modules: Vec<String>,
    symbols: HashMap<(String, String), u64>,
    types: HashMap<(String, String), Layout>,
}

impl Default for MemoryImage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryImage {
    /// Return an empty `MemoryImage`.
    pub fn new() -> MemoryImage {
        MemoryImage {
            regions: vec![],
            regions_by_addr: RangeMap::new(),
            modules: vec![],
            symbols: HashMap::new(),
            types: HashMap::new(),
        }
    }

    /// Add a region of memory starting at `base_address`.
    ///
    /// A region that overlaps one already in the image is discarded.
    pub fn add_region(mut self, base_address: u64, bytes: impl Into<Vec<u8>>) -> MemoryImage {
        self.regions.push(MemoryRegion {
            base_address,
            bytes: bytes.into(),
        });
        self.regions_by_addr = into_rangemap_safe(
            self.regions
                .iter()
                .enumerate()
                .filter_map(|(i, region)| Some((region.memory_range()?, i)))
                .collect(),
        );
        self
    }

    /// Add a loaded module. Modules are reported in the order they were added.
    pub fn add_module(mut self, name: &str) -> MemoryImage {
        self.modules.push(name.to_owned());
        self
    }

    /// Record the address of the global `symbol` in `module`.
    pub fn add_symbol(mut self, module: &str, symbol: &str, address: u64) -> MemoryImage {
        self.symbols.insert(
            (normalize_module_name(module), symbol.to_owned()),
            address,
        );
        self
    }

    /// Record that the symbols of `module` declare `type_name` with `layout`.
    pub fn declare_type(mut self, module: &str, type_name: &str, layout: Layout) -> MemoryImage {
        self.types.insert(
            (normalize_module_name(module), type_name.to_owned()),
            layout,
        );
        self
    }

    /// The regions of memory in this image, in order by address.
    pub fn regions(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions_by_addr
            .ranges_values()
            .filter_map(move |&(_, i)| self.regions.get(i))
    }

    /// The region containing `address`, if there is one.
    pub fn region_at_address(&self, address: u64) -> Option<&MemoryRegion> {
        self.regions_by_addr
            .get(address)
            .and_then(|&i| self.regions.get(i))
    }

    /// Copy out a range that starts in one region and continues into the regions that
    /// directly follow it. Any gap along the way fails the whole read.
    fn read_across_regions(&self, address: u64, length: usize) -> Option<Vec<u8>> {
        let mut bytes = Vec::new();
        let mut cursor = address;
        while bytes.len() < length {
            let region = self.region_at_address(cursor)?;
            let offset = usize::try_from(cursor - region.base_address).ok()?;
            let available = region.bytes.get(offset..)?;
            let take = available.len().min(length - bytes.len());
            bytes.extend_from_slice(&available[..take]);
            cursor = cursor.checked_add(take as u64)?;
        }
        Some(bytes)
    }
}

impl MemoryProvider for MemoryImage {
    fn read_bytes(&self, address: u64, length: usize) -> Result<Cow<'_, [u8]>, ProviderError> {
        if length == 0 {
            return Ok(Cow::Borrowed(&[]));
        }
        let unmapped = ProviderError::Unmapped { address, length };
        let region = self.region_at_address(address).ok_or(unmapped.clone())?;
        if let Some(bytes) = region.get(address, length) {
            return Ok(Cow::Borrowed(bytes));
        }
        self.read_across_regions(address, length)
            .map(Cow::Owned)
            .ok_or(unmapped)
    }

    fn symbol_address(&self, module: &str, symbol: &str) -> Option<u64> {
        self.symbols
            .get(&(normalize_module_name(module), symbol.to_owned()))
            .copied()
    }

    fn type_layout(&self, module: &str, type_name: &str) -> Result<Layout, ProviderError> {
        self.types
            .get(&(normalize_module_name(module), type_name.to_owned()))
            .copied()
            .ok_or_else(|| ProviderError::SymbolUnavailable {
                module: module.to_owned(),
                name: type_name.to_owned(),
            })
    }

    fn modules(&self) -> Vec<String> {
        self.modules.clone()
    }
}

/// Build a `RangeMap` out of possibly unsorted and overlapping ranges.
///
/// Ranges that overlap one that starts earlier are dropped.
fn into_rangemap_safe<V: Clone + Eq + Debug>(mut input: Vec<(Range<u64>, V)>) -> RangeMap<u64, V> {
    input.sort_by_key(|x| x.0);
    let mut vec: Vec<(Range<u64>, V)> = Vec::with_capacity(input.len());
    for (range, val) in input {
        if let Some((last_range, _)) = vec.last() {
            if range.start <= last_range.end {
                warn!(
                    "discarding memory region {:#x}-{:#x}, it overlaps {:#x}-{:#x}",
                    range.start, range.end, last_range.start, last_range.end
                );
                continue;
            }
        }
        vec.push((range, val));
    }
    vec.into_iter().collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_read_bytes() {
        let image = MemoryImage::new()
            .add_region(0x2000, vec![0xaa; 16])
            .add_region(0x1000, (0u8..16).collect::<Vec<_>>());
        assert_eq!(&image.read_bytes(0x1000, 4).unwrap()[..], &[0, 1, 2, 3]);
        assert_eq!(&image.read_bytes(0x100c, 4).unwrap()[..], &[12, 13, 14, 15]);
        assert_eq!(&image.read_bytes(0x2008, 1).unwrap()[..], &[0xaa]);
        assert_eq!(
            image.read_bytes(0x100d, 4),
            Err(ProviderError::Unmapped {
                address: 0x100d,
                length: 4
            })
        );
        assert!(image.read_bytes(0x0fff, 1).is_err());
        assert!(image.read_bytes(0x1010, 1).is_err());
        assert_eq!(image.regions().count(), 2);
    }

    #[test]
    fn test_reads_span_adjacent_regions() {
        let image = MemoryImage::new()
            .add_region(0x1008, vec![2; 8])
            .add_region(0x1000, vec![1; 8])
            .add_region(0x1010, vec![3; 4])
            .add_region(0x1020, vec![4; 8]);
        assert_eq!(
            &image.read_bytes(0x1004, 8).unwrap()[..],
            &[1, 1, 1, 1, 2, 2, 2, 2]
        );
        assert_eq!(image.read_bytes(0x1000, 20).unwrap().len(), 20);
        assert_eq!(&image.read_bytes(0x1008, 8).unwrap()[..], &[2; 8]);
        // 0x1014..0x1020 is not in the image.
        assert_eq!(
            image.read_bytes(0x1010, 0x14),
            Err(ProviderError::Unmapped {
                address: 0x1010,
                length: 0x14
            })
        );
        assert!(image.read_bytes(0x1000, 21).is_err());
    }

    #[test]
    fn test_overlapping_region() {
        let image = MemoryImage::new()
            .add_region(0x1000, vec![1; 16])
            .add_region(0x1008, vec![2; 16]);
        assert_eq!(image.regions().count(), 1);
        assert_eq!(&image.read_bytes(0x1008, 1).unwrap()[..], &[1]);
        assert!(image.read_bytes(0x1010, 1).is_err());
    }

    #[test]
    fn test_module_names() {
        assert_eq!(normalize_module_name("D3D12Core.DLL"), "d3d12core");
        assert_eq!(normalize_module_name("/usr/lib/d3d12.dll"), "d3d12");
        assert_eq!(normalize_module_name("d3d12.dll.mui"), "d3d12.dll.mui");

        let image = MemoryImage::new()
            .add_module("C:\\Windows\\System32\\D3D12.dll")
            .add_symbol("D3D12.DLL", "D3D12DeviceRemovedExtendedData", 0x5000)
            .declare_type("d3d12.dll", "T", Layout::default());
        assert_eq!(
            image.symbol_address("d3d12", "D3D12DeviceRemovedExtendedData"),
            Some(0x5000)
        );
        assert_eq!(image.symbol_address("d3d12core", "D3D12DeviceRemovedExtendedData"), None);
        assert_eq!(image.type_layout("D3D12", "T"), Ok(Layout::default()));
        assert_eq!(
            image.type_layout("d3d12core", "T"),
            Err(ProviderError::SymbolUnavailable {
                module: String::from("d3d12core"),
                name: String::from("T"),
            })
        );
        assert_eq!(image.modules(), vec!["C:\\Windows\\System32\\D3D12.dll"]);
    }
}
