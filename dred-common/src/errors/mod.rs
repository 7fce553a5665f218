#![allow(non_camel_case_types)]
#![allow(clippy::upper_case_acronyms)]

use crate::format::dred_enum;

dred_enum! {
    /// `HRESULT` values D3D12 reports as the reason a device was removed.
    ///
    /// This covers the codes `ID3D12Device::GetDeviceRemovedReason` documents. Any other
    /// value is still a valid `HRESULT`, it just has no name here.
    pub enum HRESULT {
        /// The device was not removed.
        S_OK = 0x0,
        /// The application provided invalid parameter data.
        DXGI_ERROR_INVALID_CALL = 0x887a0001,
        /// The GPU was physically removed, or a driver upgrade occurred.
        DXGI_ERROR_DEVICE_REMOVED = 0x887a0005,
        /// The device took too long to execute commands, or it hung.
        DXGI_ERROR_DEVICE_HUNG = 0x887a0006,
        /// The device failed due to a badly formed command.
        DXGI_ERROR_DEVICE_RESET = 0x887a0007,
        /// The driver encountered a problem and was put into the removed state.
        DXGI_ERROR_DRIVER_INTERNAL_ERROR = 0x887a0020,
        E_OUTOFMEMORY = 0x8007000e,
        E_INVALIDARG = 0x80070057,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn test_device_removed_reason() {
        assert_eq!(
            HRESULT::from_u32(0x887a0006),
            Some(HRESULT::DXGI_ERROR_DEVICE_HUNG)
        );
        assert_eq!(HRESULT::from_u32(0x887a0002), None);
    }
}
