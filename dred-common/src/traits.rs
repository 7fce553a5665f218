/// An enumeration whose enumerant names can be looked up from raw values.
///
/// This is how a debugger type system would describe an enum: a type name and a table of
/// `(name, value)` pairs. Values need not be contiguous and a name may share its value
/// with another.
pub trait EnumSchema {
    /// The name of the enumeration type.
    const NAME: &'static str;
    /// Every enumerant of the type, in declaration order.
    const ENUMERANTS: &'static [(&'static str, u32)];
}

/// A structure that is one link of a singly-linked list in process memory.
pub trait ChainNode {
    /// The address of the next node, or `0` at the end of the list.
    fn next(&self) -> u64;
}

macro_rules! impl_chain_node {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ChainNode for $ty {
                fn next(&self) -> u64 {
                    self.next
                }
            }
        )*
    };
}

impl_chain_node!(
    crate::format::D3D12_AUTO_BREADCRUMB_NODE,
    crate::format::D3D12_AUTO_BREADCRUMB_NODE1,
    crate::format::D3D12_DRED_ALLOCATION_NODE,
    crate::format::D3D12_DRED_ALLOCATION_NODE1,
);
