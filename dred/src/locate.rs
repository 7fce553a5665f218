use tracing::{debug, trace};

use dred_common::format::{Layout, DRED_PAYLOAD_SYMBOL, DRED_VERSIONED_TYPE};

use crate::dred::{DeviceRemovedExtendedData, DredError};
use crate::provider::{normalize_module_name, MemoryProvider};

/// The modules that may export `D3D12DeviceRemovedExtendedData`, in the order they're tried.
///
/// Newer runtimes ship the implementation in `d3d12core` with `d3d12` as a thin loader.
pub const DRED_MODULES: [&str; 2] = ["d3d12core", "d3d12"];

/// Find the DRED payload: the first of [`DRED_MODULES`] whose symbols resolve it.
///
/// Returns the module and the payload's address.
pub fn locate_payload<P: MemoryProvider + ?Sized>(
    provider: &P,
) -> Result<(&'static str, u64), DredError> {
    for module in DRED_MODULES {
        match provider.symbol_address(module, DRED_PAYLOAD_SYMBOL) {
            Some(address) => {
                debug!("found {DRED_PAYLOAD_SYMBOL} in {module} at {address:#x}");
                return Ok((module, address));
            }
            None => trace!("{DRED_PAYLOAD_SYMBOL} is not in {module}"),
        }
    }
    Err(DredError::PayloadNotFound)
}

/// Find the layout of the DRED payload type.
///
/// `module` is asked first. The symbols for the module that exports the payload don't always
/// include its type, so every other loaded module is asked next, in load order. The first one
/// that knows the type decides.
pub fn payload_layout<P: MemoryProvider + ?Sized>(
    provider: &P,
    module: &str,
) -> Result<Layout, DredError> {
    if let Ok(layout) = provider.type_layout(module, DRED_VERSIONED_TYPE) {
        return Ok(layout);
    }
    debug!("{DRED_VERSIONED_TYPE} is not in the symbols for {module}, trying other modules");

    let tried = normalize_module_name(module);
    provider
        .modules()
        .iter()
        .filter(|candidate| normalize_module_name(candidate) != tried)
        .find_map(|candidate| {
            let layout = provider.type_layout(candidate, DRED_VERSIONED_TYPE).ok()?;
            debug!("using {DRED_VERSIONED_TYPE} from {candidate}");
            Some(layout)
        })
        .ok_or(DredError::SchemaUnavailable)
}

/// Find and decode the DRED payload of the process `provider` describes.
pub fn locate_and_decode<P: MemoryProvider + ?Sized>(
    provider: &P,
) -> Result<DeviceRemovedExtendedData, DredError> {
    let (module, address) = locate_payload(provider)?;
    let layout = payload_layout(provider, module)?;
    DeviceRemovedExtendedData::decode(provider, address, layout)
}

/// Another name for [`locate_and_decode`].
pub fn device_removed_extended_data<P: MemoryProvider + ?Sized>(
    provider: &P,
) -> Result<DeviceRemovedExtendedData, DredError> {
    locate_and_decode(provider)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::format::PointerWidth;
    use crate::provider::MemoryImage;
    use scroll::Endian;

    const LAYOUT32: Layout = Layout {
        endian: Endian::Little,
        pointer_width: PointerWidth::Bits32,
    };

    #[test]
    fn test_prefers_d3d12core() {
        let image = MemoryImage::new()
            .add_symbol("d3d12", DRED_PAYLOAD_SYMBOL, 0x2000)
            .add_symbol("D3D12Core.dll", DRED_PAYLOAD_SYMBOL, 0x1000);
        assert_eq!(locate_payload(&image), Ok(("d3d12core", 0x1000)));

        let image = MemoryImage::new().add_symbol("d3d12.dll", DRED_PAYLOAD_SYMBOL, 0x2000);
        assert_eq!(locate_payload(&image), Ok(("d3d12", 0x2000)));
    }

    #[test]
    fn test_payload_not_found() {
        let image = MemoryImage::new()
            .add_module("d3d12.dll")
            .add_symbol("dxgi", DRED_PAYLOAD_SYMBOL, 0x2000);
        assert_eq!(locate_payload(&image), Err(DredError::PayloadNotFound));
        assert_eq!(
            locate_and_decode(&image).unwrap_err(),
            DredError::PayloadNotFound
        );
    }

    #[test]
    fn test_layout_from_other_module() {
        let image = MemoryImage::new()
            .add_module("app.exe")
            .add_module("d3d12.dll")
            .add_module("kernelbase.dll")
            .add_module("nvwgf2umx.dll")
            .declare_type("d3d12", DRED_VERSIONED_TYPE, Layout::default())
            .declare_type("kernelbase", DRED_VERSIONED_TYPE, LAYOUT32)
            .declare_type("nvwgf2umx", DRED_VERSIONED_TYPE, Layout::default());
        assert_eq!(payload_layout(&image, "d3d12"), Ok(Layout::default()));
        // Nothing declares the type for d3d12core, the first loaded module that does is used.
        assert_eq!(payload_layout(&image, "d3d12core"), Ok(Layout::default()));
        assert_eq!(payload_layout(&image, "app"), Ok(Layout::default()));
    }

    #[test]
    fn test_layout_first_declaring_module_wins() {
        let image = MemoryImage::new()
            .add_module("d3d12core.dll")
            .add_module("kernelbase.dll")
            .add_module("dxgi.dll")
            .declare_type("kernelbase", DRED_VERSIONED_TYPE, LAYOUT32)
            .declare_type("dxgi", DRED_VERSIONED_TYPE, Layout::default());
        assert_eq!(payload_layout(&image, "d3d12core"), Ok(LAYOUT32));
    }

    #[test]
    fn test_schema_unavailable() {
        let image = MemoryImage::new()
            .add_module("d3d12core.dll")
            .add_module("app.exe")
            .add_symbol("d3d12core", DRED_PAYLOAD_SYMBOL, 0x1000);
        assert_eq!(
            payload_layout(&image, "d3d12core"),
            Err(DredError::SchemaUnavailable)
        );
        assert_eq!(
            locate_and_decode(&image).unwrap_err().name(),
            "SchemaUnavailable"
        );
    }
}
