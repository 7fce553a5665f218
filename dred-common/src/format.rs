//! DRED structure definitions.
//!
//! Types defined here should match those defined in [Microsoft's `d3d12.h`][msdn]. The driver
//! leaves these structures in process memory, so unlike file formats their layout depends on
//! the pointer width of the process that wrote them. Every structure is read with a [`Layout`]
//! context which supplies the endianness and pointer width, and fields are placed with natural
//! C alignment for that width.
//!
//! Pointer fields are always widened to `u64`; a null pointer is `0`.
//!
//! [msdn]: https://learn.microsoft.com/en-us/windows/win32/api/d3d12/
#![allow(non_camel_case_types)]
#![allow(non_upper_case_globals)]

use bitflags::bitflags;
use scroll::ctx::{SizeWith, TryFromCtx};
use scroll::{Endian, Pread};

/// Size of the buffer the runtime allocates for each auto-breadcrumb node.
pub const AutoBreadcrumbsBufferSizeInBytes: u32 = 65536;

/// Offset of the command history within the auto-breadcrumb buffer.
///
/// The bytes before this offset are a header reserved by the runtime.
pub const AutoBreadcrumbsCommandHistoryOffset: u32 = 4096;

/// Number of `D3D12_AUTO_BREADCRUMB_OP` slots in the command history ring.
pub const AutoBreadcrumbsCommandHistoryMax: u32 =
    (AutoBreadcrumbsBufferSizeInBytes - AutoBreadcrumbsCommandHistoryOffset) / 4;

/// The exported symbol holding the process-wide DRED payload.
pub const DRED_PAYLOAD_SYMBOL: &str = "D3D12DeviceRemovedExtendedData";

/// The type of the exported DRED payload symbol.
pub const DRED_VERSIONED_TYPE: &str = "D3D12_VERSIONED_DEVICE_REMOVED_EXTENDED_DATA";

/// Offset of the versioned union within `D3D12_VERSIONED_DEVICE_REMOVED_EXTENDED_DATA`.
///
/// The union contains a 64-bit GPU virtual address in every version after 1.0, so it is
/// 8-byte aligned for both pointer widths.
pub const DRED_VERSIONED_DATA_OFFSET: u64 = 8;

/// The pointer width of the process the structures were read from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PointerWidth {
    Bits32,
    Bits64,
}

impl PointerWidth {
    /// The size of a pointer, in bytes.
    pub fn size(self) -> usize {
        match self {
            PointerWidth::Bits32 => 4,
            PointerWidth::Bits64 => 8,
        }
    }
}

/// The context needed to interpret DRED structures in memory.
///
/// A `Layout` is what a module's symbols tell us about a type: where the fields are depends
/// only on the pointer width and byte order of the process.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    pub endian: Endian,
    pub pointer_width: PointerWidth,
}

impl Layout {
    pub fn new(endian: Endian, pointer_width: PointerWidth) -> Layout {
        Layout {
            endian,
            pointer_width,
        }
    }

    /// Alignment of a structure whose widest member is a pointer.
    fn pointer_align(&self) -> usize {
        self.pointer_width.size()
    }
}

impl Default for Layout {
    fn default() -> Layout {
        Layout::new(Endian::Little, PointerWidth::Bits64)
    }
}

#[inline]
fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

fn gread_u32(src: &[u8], offset: &mut usize, ctx: Layout) -> Result<u32, scroll::Error> {
    *offset = align_up(*offset, 4);
    src.gread_with(offset, ctx.endian)
}

fn gread_u64(src: &[u8], offset: &mut usize, ctx: Layout) -> Result<u64, scroll::Error> {
    *offset = align_up(*offset, 8);
    src.gread_with(offset, ctx.endian)
}

fn gread_ptr(src: &[u8], offset: &mut usize, ctx: Layout) -> Result<u64, scroll::Error> {
    match ctx.pointer_width {
        PointerWidth::Bits32 => gread_u32(src, offset, ctx).map(u64::from),
        PointerWidth::Bits64 => gread_u64(src, offset, ctx),
    }
}

/// Declares a DRED enumeration together with its [`EnumSchema`](crate::traits::EnumSchema) table.
macro_rules! dred_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:expr, )*
        }
    ) => {
        $(#[$meta])*
        #[repr(u32)]
        #[derive(Copy, Clone, PartialEq, Eq, Debug, ::enum_primitive_derive::Primitive)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value, )*
        }

        impl $crate::traits::EnumSchema for $name {
            const NAME: &'static str = stringify!($name);
            const ENUMERANTS: &'static [(&'static str, u32)] = &[
                $( (stringify!($variant), $value), )*
            ];
        }
    };
}

pub(crate) use dred_enum;

dred_enum! {
    /// The version tag of `D3D12_VERSIONED_DEVICE_REMOVED_EXTENDED_DATA`.
    pub enum D3D12_DRED_VERSION {
        D3D12_DRED_VERSION_1_0 = 1,
        D3D12_DRED_VERSION_1_1 = 2,
        D3D12_DRED_VERSION_1_2 = 3,
        D3D12_DRED_VERSION_1_3 = 4,
    }
}

dred_enum! {
    /// An operation recorded in an auto-breadcrumb command history.
    pub enum D3D12_AUTO_BREADCRUMB_OP {
        D3D12_AUTO_BREADCRUMB_OP_SETMARKER = 0,
        D3D12_AUTO_BREADCRUMB_OP_BEGINEVENT = 1,
        D3D12_AUTO_BREADCRUMB_OP_ENDEVENT = 2,
        D3D12_AUTO_BREADCRUMB_OP_DRAWINSTANCED = 3,
        D3D12_AUTO_BREADCRUMB_OP_DRAWINDEXEDINSTANCED = 4,
        D3D12_AUTO_BREADCRUMB_OP_EXECUTEINDIRECT = 5,
        D3D12_AUTO_BREADCRUMB_OP_DISPATCH = 6,
        D3D12_AUTO_BREADCRUMB_OP_COPYBUFFERREGION = 7,
        D3D12_AUTO_BREADCRUMB_OP_COPYTEXTUREREGION = 8,
        D3D12_AUTO_BREADCRUMB_OP_COPYRESOURCE = 9,
        D3D12_AUTO_BREADCRUMB_OP_COPYTILES = 10,
        D3D12_AUTO_BREADCRUMB_OP_RESOLVESUBRESOURCE = 11,
        D3D12_AUTO_BREADCRUMB_OP_CLEARRENDERTARGETVIEW = 12,
        D3D12_AUTO_BREADCRUMB_OP_CLEARUNORDEREDACCESSVIEW = 13,
        D3D12_AUTO_BREADCRUMB_OP_CLEARDEPTHSTENCILVIEW = 14,
        D3D12_AUTO_BREADCRUMB_OP_RESOURCEBARRIER = 15,
        D3D12_AUTO_BREADCRUMB_OP_EXECUTEBUNDLE = 16,
        D3D12_AUTO_BREADCRUMB_OP_PRESENT = 17,
        D3D12_AUTO_BREADCRUMB_OP_RESOLVEQUERYDATA = 18,
        D3D12_AUTO_BREADCRUMB_OP_BEGINSUBMISSION = 19,
        D3D12_AUTO_BREADCRUMB_OP_ENDSUBMISSION = 20,
        D3D12_AUTO_BREADCRUMB_OP_DECODEFRAME = 21,
        D3D12_AUTO_BREADCRUMB_OP_PROCESSFRAMES = 22,
        D3D12_AUTO_BREADCRUMB_OP_ATOMICCOPYBUFFERUINT = 23,
        D3D12_AUTO_BREADCRUMB_OP_ATOMICCOPYBUFFERUINT64 = 24,
        D3D12_AUTO_BREADCRUMB_OP_RESOLVESUBRESOURCEREGION = 25,
        D3D12_AUTO_BREADCRUMB_OP_WRITEBUFFERIMMEDIATE = 26,
        D3D12_AUTO_BREADCRUMB_OP_DECODEFRAME1 = 27,
        D3D12_AUTO_BREADCRUMB_OP_SETPROTECTEDRESOURCESESSION = 28,
        D3D12_AUTO_BREADCRUMB_OP_DECODEFRAME2 = 29,
        D3D12_AUTO_BREADCRUMB_OP_PROCESSFRAMES1 = 30,
        D3D12_AUTO_BREADCRUMB_OP_BUILDRAYTRACINGACCELERATIONSTRUCTURE = 31,
        D3D12_AUTO_BREADCRUMB_OP_EMITRAYTRACINGACCELERATIONSTRUCTUREPOSTBUILDINFO = 32,
        D3D12_AUTO_BREADCRUMB_OP_COPYRAYTRACINGACCELERATIONSTRUCTURE = 33,
        D3D12_AUTO_BREADCRUMB_OP_DISPATCHRAYS = 34,
        D3D12_AUTO_BREADCRUMB_OP_INITIALIZEMETACOMMAND = 35,
        D3D12_AUTO_BREADCRUMB_OP_EXECUTEMETACOMMAND = 36,
        D3D12_AUTO_BREADCRUMB_OP_ESTIMATEMOTION = 37,
        D3D12_AUTO_BREADCRUMB_OP_RESOLVEMOTIONVECTORHEAP = 38,
        D3D12_AUTO_BREADCRUMB_OP_SETPIPELINESTATE1 = 39,
        D3D12_AUTO_BREADCRUMB_OP_INITIALIZEEXTENSIONCOMMAND = 40,
        D3D12_AUTO_BREADCRUMB_OP_EXECUTEEXTENSIONCOMMAND = 41,
        D3D12_AUTO_BREADCRUMB_OP_DISPATCHMESH = 42,
        D3D12_AUTO_BREADCRUMB_OP_ENCODEFRAME = 43,
        D3D12_AUTO_BREADCRUMB_OP_RESOLVEENCODEROUTPUTMETADATA = 44,
        D3D12_AUTO_BREADCRUMB_OP_BARRIER = 45,
        D3D12_AUTO_BREADCRUMB_OP_BEGIN_COMMAND_LIST = 46,
        D3D12_AUTO_BREADCRUMB_OP_DISPATCHGRAPH = 47,
        D3D12_AUTO_BREADCRUMB_OP_SETPROGRAM = 48,
        D3D12_AUTO_BREADCRUMB_OP_PROCESSFRAMES2 = 49,
    }
}

dred_enum! {
    /// The kind of object a `D3D12_DRED_ALLOCATION_NODE` tracks.
    pub enum D3D12_DRED_ALLOCATION_TYPE {
        D3D12_DRED_ALLOCATION_TYPE_COMMAND_QUEUE = 19,
        D3D12_DRED_ALLOCATION_TYPE_COMMAND_ALLOCATOR = 20,
        D3D12_DRED_ALLOCATION_TYPE_PIPELINE_STATE = 21,
        D3D12_DRED_ALLOCATION_TYPE_COMMAND_LIST = 22,
        D3D12_DRED_ALLOCATION_TYPE_FENCE = 23,
        D3D12_DRED_ALLOCATION_TYPE_DESCRIPTOR_HEAP = 24,
        D3D12_DRED_ALLOCATION_TYPE_HEAP = 25,
        D3D12_DRED_ALLOCATION_TYPE_QUERY_HEAP = 27,
        D3D12_DRED_ALLOCATION_TYPE_COMMAND_SIGNATURE = 28,
        D3D12_DRED_ALLOCATION_TYPE_PIPELINE_LIBRARY = 29,
        D3D12_DRED_ALLOCATION_TYPE_VIDEO_DECODER = 30,
        D3D12_DRED_ALLOCATION_TYPE_VIDEO_PROCESSOR = 32,
        D3D12_DRED_ALLOCATION_TYPE_RESOURCE = 34,
        D3D12_DRED_ALLOCATION_TYPE_PASS = 35,
        D3D12_DRED_ALLOCATION_TYPE_CRYPTOSESSION = 36,
        D3D12_DRED_ALLOCATION_TYPE_CRYPTOSESSIONPOLICY = 37,
        D3D12_DRED_ALLOCATION_TYPE_PROTECTEDRESOURCESESSION = 38,
        D3D12_DRED_ALLOCATION_TYPE_VIDEO_DECODER_HEAP = 39,
        D3D12_DRED_ALLOCATION_TYPE_COMMAND_POOL = 40,
        D3D12_DRED_ALLOCATION_TYPE_COMMAND_RECORDER = 41,
        D3D12_DRED_ALLOCATION_TYPE_STATE_OBJECT = 42,
        D3D12_DRED_ALLOCATION_TYPE_METACOMMAND = 43,
        D3D12_DRED_ALLOCATION_TYPE_SCHEDULINGGROUP = 44,
        D3D12_DRED_ALLOCATION_TYPE_VIDEO_MOTION_ESTIMATOR = 45,
        D3D12_DRED_ALLOCATION_TYPE_VIDEO_MOTION_VECTOR_HEAP = 46,
        D3D12_DRED_ALLOCATION_TYPE_VIDEO_EXTENSION_COMMAND = 47,
        D3D12_DRED_ALLOCATION_TYPE_VIDEO_ENCODER = 48,
        D3D12_DRED_ALLOCATION_TYPE_VIDEO_ENCODER_HEAP = 49,
        D3D12_DRED_ALLOCATION_TYPE_INVALID = 0xffffffff,
    }
}

dred_enum! {
    /// The state of the device when DRED data was captured (DRED 1.3).
    pub enum D3D12_DRED_DEVICE_STATE {
        D3D12_DRED_DEVICE_STATE_UNKNOWN = 0,
        D3D12_DRED_DEVICE_STATE_HUNG = 3,
        D3D12_DRED_DEVICE_STATE_FAULT = 6,
        D3D12_DRED_DEVICE_STATE_PAGEFAULT = 7,
    }
}

bitflags! {
    /// Flags controlling DRED behavior (DRED 1.0 only).
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct D3D12_DRED_FLAGS: u32 {
        const D3D12_DRED_FLAG_FORCE_ENABLE = 1;
        const D3D12_DRED_FLAG_DISABLE_AUTOBREADCRUMBS = 2;
    }
}

/// A command list execution segment recorded by auto-breadcrumbs.
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://learn.microsoft.com/en-us/windows/win32/api/d3d12/ns-d3d12-d3d12_auto_breadcrumb_node
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct D3D12_AUTO_BREADCRUMB_NODE {
    pub command_list_debug_name_a: u64,
    pub command_list_debug_name_w: u64,
    pub command_queue_debug_name_a: u64,
    pub command_queue_debug_name_w: u64,
    pub command_list: u64,
    pub command_queue: u64,
    /// The number of operations issued to the command history, ever.
    ///
    /// This keeps counting after the ring wraps.
    pub breadcrumb_count: u32,
    /// Points at the number of operations the GPU has completed.
    pub last_breadcrumb_value: u64,
    /// Points at `AutoBreadcrumbsCommandHistoryMax` `D3D12_AUTO_BREADCRUMB_OP` slots.
    pub command_history: u64,
    pub next: u64,
}

impl<'a> TryFromCtx<'a, Layout> for D3D12_AUTO_BREADCRUMB_NODE {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Layout) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let node = D3D12_AUTO_BREADCRUMB_NODE {
            command_list_debug_name_a: gread_ptr(src, offset, ctx)?,
            command_list_debug_name_w: gread_ptr(src, offset, ctx)?,
            command_queue_debug_name_a: gread_ptr(src, offset, ctx)?,
            command_queue_debug_name_w: gread_ptr(src, offset, ctx)?,
            command_list: gread_ptr(src, offset, ctx)?,
            command_queue: gread_ptr(src, offset, ctx)?,
            breadcrumb_count: gread_u32(src, offset, ctx)?,
            last_breadcrumb_value: gread_ptr(src, offset, ctx)?,
            command_history: gread_ptr(src, offset, ctx)?,
            next: gread_ptr(src, offset, ctx)?,
        };
        Ok((node, align_up(*offset, ctx.pointer_align())))
    }
}

impl SizeWith<Layout> for D3D12_AUTO_BREADCRUMB_NODE {
    fn size_with(ctx: &Layout) -> usize {
        match ctx.pointer_width {
            PointerWidth::Bits32 => 40,
            PointerWidth::Bits64 => 80,
        }
    }
}

/// An annotation attached to one slot of a command history.
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://learn.microsoft.com/en-us/windows/win32/api/d3d12/ns-d3d12-d3d12_dred_breadcrumb_context
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct D3D12_DRED_BREADCRUMB_CONTEXT {
    /// The command history slot this context belongs to.
    pub breadcrumb_index: u32,
    /// A NUL-terminated UTF-16 string.
    pub context_string: u64,
}

impl<'a> TryFromCtx<'a, Layout> for D3D12_DRED_BREADCRUMB_CONTEXT {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Layout) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let context = D3D12_DRED_BREADCRUMB_CONTEXT {
            breadcrumb_index: gread_u32(src, offset, ctx)?,
            context_string: gread_ptr(src, offset, ctx)?,
        };
        Ok((context, align_up(*offset, ctx.pointer_align())))
    }
}

impl SizeWith<Layout> for D3D12_DRED_BREADCRUMB_CONTEXT {
    fn size_with(ctx: &Layout) -> usize {
        2 * ctx.pointer_width.size()
    }
}

/// `D3D12_AUTO_BREADCRUMB_NODE` with breadcrumb contexts (DRED 1.2 and later).
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://learn.microsoft.com/en-us/windows/win32/api/d3d12/ns-d3d12-d3d12_auto_breadcrumb_node1
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct D3D12_AUTO_BREADCRUMB_NODE1 {
    pub command_list_debug_name_a: u64,
    pub command_list_debug_name_w: u64,
    pub command_queue_debug_name_a: u64,
    pub command_queue_debug_name_w: u64,
    pub command_list: u64,
    pub command_queue: u64,
    pub breadcrumb_count: u32,
    pub last_breadcrumb_value: u64,
    pub command_history: u64,
    pub next: u64,
    pub breadcrumb_contexts_count: u32,
    /// Points at `breadcrumb_contexts_count` `D3D12_DRED_BREADCRUMB_CONTEXT`s.
    pub breadcrumb_contexts: u64,
}

impl<'a> TryFromCtx<'a, Layout> for D3D12_AUTO_BREADCRUMB_NODE1 {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Layout) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let node = D3D12_AUTO_BREADCRUMB_NODE1 {
            command_list_debug_name_a: gread_ptr(src, offset, ctx)?,
            command_list_debug_name_w: gread_ptr(src, offset, ctx)?,
            command_queue_debug_name_a: gread_ptr(src, offset, ctx)?,
            command_queue_debug_name_w: gread_ptr(src, offset, ctx)?,
            command_list: gread_ptr(src, offset, ctx)?,
            command_queue: gread_ptr(src, offset, ctx)?,
            breadcrumb_count: gread_u32(src, offset, ctx)?,
            last_breadcrumb_value: gread_ptr(src, offset, ctx)?,
            command_history: gread_ptr(src, offset, ctx)?,
            next: gread_ptr(src, offset, ctx)?,
            breadcrumb_contexts_count: gread_u32(src, offset, ctx)?,
            breadcrumb_contexts: gread_ptr(src, offset, ctx)?,
        };
        Ok((node, align_up(*offset, ctx.pointer_align())))
    }
}

impl SizeWith<Layout> for D3D12_AUTO_BREADCRUMB_NODE1 {
    fn size_with(ctx: &Layout) -> usize {
        match ctx.pointer_width {
            PointerWidth::Bits32 => 48,
            PointerWidth::Bits64 => 96,
        }
    }
}

impl From<D3D12_AUTO_BREADCRUMB_NODE> for D3D12_AUTO_BREADCRUMB_NODE1 {
    fn from(node: D3D12_AUTO_BREADCRUMB_NODE) -> Self {
        D3D12_AUTO_BREADCRUMB_NODE1 {
            command_list_debug_name_a: node.command_list_debug_name_a,
            command_list_debug_name_w: node.command_list_debug_name_w,
            command_queue_debug_name_a: node.command_queue_debug_name_a,
            command_queue_debug_name_w: node.command_queue_debug_name_w,
            command_list: node.command_list,
            command_queue: node.command_queue,
            breadcrumb_count: node.breadcrumb_count,
            last_breadcrumb_value: node.last_breadcrumb_value,
            command_history: node.command_history,
            next: node.next,
            breadcrumb_contexts_count: 0,
            breadcrumb_contexts: 0,
        }
    }
}

/// A tracked allocation, either live or recently freed, near a page fault.
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://learn.microsoft.com/en-us/windows/win32/api/d3d12/ns-d3d12-d3d12_dred_allocation_node
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct D3D12_DRED_ALLOCATION_NODE {
    pub object_name_a: u64,
    pub object_name_w: u64,
    /// A [`D3D12_DRED_ALLOCATION_TYPE`] value.
    pub allocation_type: u32,
    pub next: u64,
}

impl<'a> TryFromCtx<'a, Layout> for D3D12_DRED_ALLOCATION_NODE {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Layout) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let node = D3D12_DRED_ALLOCATION_NODE {
            object_name_a: gread_ptr(src, offset, ctx)?,
            object_name_w: gread_ptr(src, offset, ctx)?,
            allocation_type: gread_u32(src, offset, ctx)?,
            next: gread_ptr(src, offset, ctx)?,
        };
        Ok((node, align_up(*offset, ctx.pointer_align())))
    }
}

impl SizeWith<Layout> for D3D12_DRED_ALLOCATION_NODE {
    fn size_with(ctx: &Layout) -> usize {
        4 * ctx.pointer_width.size()
    }
}

/// `D3D12_DRED_ALLOCATION_NODE` with the allocated object (DRED 1.2 and later).
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://learn.microsoft.com/en-us/windows/win32/api/d3d12/ns-d3d12-d3d12_dred_allocation_node1
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct D3D12_DRED_ALLOCATION_NODE1 {
    pub object_name_a: u64,
    pub object_name_w: u64,
    pub allocation_type: u32,
    pub next: u64,
    /// The `IUnknown` of the allocated object.
    pub object: u64,
}

impl<'a> TryFromCtx<'a, Layout> for D3D12_DRED_ALLOCATION_NODE1 {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Layout) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let node = D3D12_DRED_ALLOCATION_NODE1 {
            object_name_a: gread_ptr(src, offset, ctx)?,
            object_name_w: gread_ptr(src, offset, ctx)?,
            allocation_type: gread_u32(src, offset, ctx)?,
            next: gread_ptr(src, offset, ctx)?,
            object: gread_ptr(src, offset, ctx)?,
        };
        Ok((node, align_up(*offset, ctx.pointer_align())))
    }
}

impl SizeWith<Layout> for D3D12_DRED_ALLOCATION_NODE1 {
    fn size_with(ctx: &Layout) -> usize {
        5 * ctx.pointer_width.size()
    }
}

impl From<D3D12_DRED_ALLOCATION_NODE> for D3D12_DRED_ALLOCATION_NODE1 {
    fn from(node: D3D12_DRED_ALLOCATION_NODE) -> Self {
        D3D12_DRED_ALLOCATION_NODE1 {
            object_name_a: node.object_name_a,
            object_name_w: node.object_name_w,
            allocation_type: node.allocation_type,
            next: node.next,
            object: 0,
        }
    }
}

/// Page fault information, shared by `D3D12_DRED_PAGE_FAULT_OUTPUT` and
/// `D3D12_DRED_PAGE_FAULT_OUTPUT1`, which differ only in the allocation node type their
/// chains point at.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct D3D12_DRED_PAGE_FAULT_OUTPUT {
    pub page_fault_va: u64,
    pub head_existing_allocation_node: u64,
    pub head_recent_freed_allocation_node: u64,
}

impl<'a> TryFromCtx<'a, Layout> for D3D12_DRED_PAGE_FAULT_OUTPUT {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Layout) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let output = D3D12_DRED_PAGE_FAULT_OUTPUT {
            page_fault_va: gread_u64(src, offset, ctx)?,
            head_existing_allocation_node: gread_ptr(src, offset, ctx)?,
            head_recent_freed_allocation_node: gread_ptr(src, offset, ctx)?,
        };
        Ok((output, align_up(*offset, 8)))
    }
}

impl SizeWith<Layout> for D3D12_DRED_PAGE_FAULT_OUTPUT {
    fn size_with(ctx: &Layout) -> usize {
        align_up(8 + 2 * ctx.pointer_width.size(), 8)
    }
}

/// `D3D12_DRED_PAGE_FAULT_OUTPUT1` with page fault flags (DRED 1.3).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct D3D12_DRED_PAGE_FAULT_OUTPUT2 {
    pub page_fault_va: u64,
    pub head_existing_allocation_node: u64,
    pub head_recent_freed_allocation_node: u64,
    /// `D3D12_DRED_PAGE_FAULT_FLAGS`; no flags are defined yet.
    pub page_fault_flags: u32,
}

impl<'a> TryFromCtx<'a, Layout> for D3D12_DRED_PAGE_FAULT_OUTPUT2 {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Layout) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let output = D3D12_DRED_PAGE_FAULT_OUTPUT2 {
            page_fault_va: gread_u64(src, offset, ctx)?,
            head_existing_allocation_node: gread_ptr(src, offset, ctx)?,
            head_recent_freed_allocation_node: gread_ptr(src, offset, ctx)?,
            page_fault_flags: gread_u32(src, offset, ctx)?,
        };
        Ok((output, align_up(*offset, 8)))
    }
}

impl SizeWith<Layout> for D3D12_DRED_PAGE_FAULT_OUTPUT2 {
    fn size_with(ctx: &Layout) -> usize {
        align_up(8 + 2 * ctx.pointer_width.size() + 4, 8)
    }
}

/// DRED 1.0.
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://learn.microsoft.com/en-us/windows/win32/api/d3d12/ns-d3d12-d3d12_device_removed_extended_data
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct D3D12_DEVICE_REMOVED_EXTENDED_DATA {
    /// See [`D3D12_DRED_FLAGS`].
    pub flags: u32,
    /// Points at a chain of `D3D12_AUTO_BREADCRUMB_NODE`s.
    pub head_auto_breadcrumb_node: u64,
}

impl<'a> TryFromCtx<'a, Layout> for D3D12_DEVICE_REMOVED_EXTENDED_DATA {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Layout) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let data = D3D12_DEVICE_REMOVED_EXTENDED_DATA {
            flags: gread_u32(src, offset, ctx)?,
            head_auto_breadcrumb_node: gread_ptr(src, offset, ctx)?,
        };
        Ok((data, align_up(*offset, ctx.pointer_align())))
    }
}

impl SizeWith<Layout> for D3D12_DEVICE_REMOVED_EXTENDED_DATA {
    fn size_with(ctx: &Layout) -> usize {
        2 * ctx.pointer_width.size()
    }
}

/// DRED 1.1.
///
/// Breadcrumb nodes are `D3D12_AUTO_BREADCRUMB_NODE`s and allocation nodes are
/// `D3D12_DRED_ALLOCATION_NODE`s.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct D3D12_DEVICE_REMOVED_EXTENDED_DATA1 {
    /// An `HRESULT`.
    pub device_removed_reason: u32,
    pub head_auto_breadcrumb_node: u64,
    pub page_fault_output: D3D12_DRED_PAGE_FAULT_OUTPUT,
}

impl<'a> TryFromCtx<'a, Layout> for D3D12_DEVICE_REMOVED_EXTENDED_DATA1 {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Layout) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let device_removed_reason = gread_u32(src, offset, ctx)?;
        let head_auto_breadcrumb_node = gread_ptr(src, offset, ctx)?;
        *offset = align_up(*offset, 8);
        let page_fault_output = src.gread_with(offset, ctx)?;
        let data = D3D12_DEVICE_REMOVED_EXTENDED_DATA1 {
            device_removed_reason,
            head_auto_breadcrumb_node,
            page_fault_output,
        };
        Ok((data, align_up(*offset, 8)))
    }
}

impl SizeWith<Layout> for D3D12_DEVICE_REMOVED_EXTENDED_DATA1 {
    fn size_with(ctx: &Layout) -> usize {
        align_up(4 + ctx.pointer_width.size(), 8) + D3D12_DRED_PAGE_FAULT_OUTPUT::size_with(ctx)
    }
}

/// DRED 1.2.
///
/// Identical in layout to [`D3D12_DEVICE_REMOVED_EXTENDED_DATA1`], but breadcrumb nodes are
/// `D3D12_AUTO_BREADCRUMB_NODE1`s and allocation nodes are `D3D12_DRED_ALLOCATION_NODE1`s.
pub type D3D12_DEVICE_REMOVED_EXTENDED_DATA2 = D3D12_DEVICE_REMOVED_EXTENDED_DATA1;

/// DRED 1.3.
///
/// This struct matches the [Microsoft struct][msdn] of the same name.
///
/// [msdn]: https://learn.microsoft.com/en-us/windows/win32/api/d3d12/ns-d3d12-d3d12_device_removed_extended_data3
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct D3D12_DEVICE_REMOVED_EXTENDED_DATA3 {
    pub device_removed_reason: u32,
    pub head_auto_breadcrumb_node: u64,
    pub page_fault_output: D3D12_DRED_PAGE_FAULT_OUTPUT2,
    /// A [`D3D12_DRED_DEVICE_STATE`] value.
    pub device_state: u32,
}

impl<'a> TryFromCtx<'a, Layout> for D3D12_DEVICE_REMOVED_EXTENDED_DATA3 {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Layout) -> Result<(Self, usize), Self::Error> {
        let offset = &mut 0;
        let device_removed_reason = gread_u32(src, offset, ctx)?;
        let head_auto_breadcrumb_node = gread_ptr(src, offset, ctx)?;
        *offset = align_up(*offset, 8);
        let page_fault_output = src.gread_with(offset, ctx)?;
        let device_state = gread_u32(src, offset, ctx)?;
        let data = D3D12_DEVICE_REMOVED_EXTENDED_DATA3 {
            device_removed_reason,
            head_auto_breadcrumb_node,
            page_fault_output,
            device_state,
        };
        Ok((data, align_up(*offset, 8)))
    }
}

impl SizeWith<Layout> for D3D12_DEVICE_REMOVED_EXTENDED_DATA3 {
    fn size_with(ctx: &Layout) -> usize {
        align_up(
            align_up(4 + ctx.pointer_width.size(), 8)
                + D3D12_DRED_PAGE_FAULT_OUTPUT2::size_with(ctx)
                + 4,
            8,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::traits::EnumSchema;
    use num_traits::FromPrimitive;

    const LAYOUT64: Layout = Layout {
        endian: Endian::Little,
        pointer_width: PointerWidth::Bits64,
    };
    const LAYOUT32: Layout = Layout {
        endian: Endian::Little,
        pointer_width: PointerWidth::Bits32,
    };

    #[test]
    fn test_history_capacity() {
        assert_eq!(AutoBreadcrumbsCommandHistoryMax, 15360);
    }

    #[test]
    fn test_struct_sizes() {
        assert_eq!(D3D12_AUTO_BREADCRUMB_NODE::size_with(&LAYOUT64), 80);
        assert_eq!(D3D12_AUTO_BREADCRUMB_NODE1::size_with(&LAYOUT64), 96);
        assert_eq!(D3D12_DRED_BREADCRUMB_CONTEXT::size_with(&LAYOUT64), 16);
        assert_eq!(D3D12_DRED_ALLOCATION_NODE::size_with(&LAYOUT64), 32);
        assert_eq!(D3D12_DRED_ALLOCATION_NODE1::size_with(&LAYOUT64), 40);
        assert_eq!(D3D12_DEVICE_REMOVED_EXTENDED_DATA::size_with(&LAYOUT64), 16);
        assert_eq!(D3D12_DEVICE_REMOVED_EXTENDED_DATA1::size_with(&LAYOUT64), 40);
        assert_eq!(D3D12_DEVICE_REMOVED_EXTENDED_DATA3::size_with(&LAYOUT64), 56);

        assert_eq!(D3D12_AUTO_BREADCRUMB_NODE::size_with(&LAYOUT32), 40);
        assert_eq!(D3D12_AUTO_BREADCRUMB_NODE1::size_with(&LAYOUT32), 48);
        assert_eq!(D3D12_DRED_BREADCRUMB_CONTEXT::size_with(&LAYOUT32), 8);
        assert_eq!(D3D12_DRED_ALLOCATION_NODE::size_with(&LAYOUT32), 16);
        assert_eq!(D3D12_DRED_ALLOCATION_NODE1::size_with(&LAYOUT32), 20);
        assert_eq!(D3D12_DEVICE_REMOVED_EXTENDED_DATA::size_with(&LAYOUT32), 8);
        assert_eq!(D3D12_DEVICE_REMOVED_EXTENDED_DATA1::size_with(&LAYOUT32), 24);
        assert_eq!(D3D12_DEVICE_REMOVED_EXTENDED_DATA3::size_with(&LAYOUT32), 40);
    }

    #[test]
    fn test_breadcrumb_node_padding() {
        // breadcrumb_count is followed by 4 bytes of padding on 64-bit.
        let mut bytes = vec![0u8; 80];
        bytes[48..52].copy_from_slice(&7u32.to_le_bytes());
        bytes[52..56].copy_from_slice(&0xffffffffu32.to_le_bytes());
        bytes[56..64].copy_from_slice(&0x1000u64.to_le_bytes());
        bytes[72..80].copy_from_slice(&0x2000u64.to_le_bytes());
        let node: D3D12_AUTO_BREADCRUMB_NODE = bytes.pread_with(0, LAYOUT64).unwrap();
        assert_eq!(node.breadcrumb_count, 7);
        assert_eq!(node.last_breadcrumb_value, 0x1000);
        assert_eq!(node.next, 0x2000);

        let mut bytes = vec![0u8; 40];
        bytes[24..28].copy_from_slice(&9u32.to_le_bytes());
        bytes[28..32].copy_from_slice(&0x3000u32.to_le_bytes());
        bytes[36..40].copy_from_slice(&0x4000u32.to_le_bytes());
        let node: D3D12_AUTO_BREADCRUMB_NODE = bytes.pread_with(0, LAYOUT32).unwrap();
        assert_eq!(node.breadcrumb_count, 9);
        assert_eq!(node.last_breadcrumb_value, 0x3000);
        assert_eq!(node.next, 0x4000);
    }

    #[test]
    fn test_dred3_device_state_offset() {
        let mut bytes = vec![0u8; 56];
        bytes[0..4].copy_from_slice(&0x887a0006u32.to_le_bytes());
        bytes[16..24].copy_from_slice(&0xdead0000u64.to_le_bytes());
        bytes[40..44].copy_from_slice(&1u32.to_le_bytes());
        bytes[48..52].copy_from_slice(&6u32.to_le_bytes());
        let (data, size) =
            D3D12_DEVICE_REMOVED_EXTENDED_DATA3::try_from_ctx(&bytes, LAYOUT64).unwrap();
        assert_eq!(size, 56);
        assert_eq!(data.device_removed_reason, 0x887a0006);
        assert_eq!(data.page_fault_output.page_fault_va, 0xdead0000);
        assert_eq!(data.page_fault_output.page_fault_flags, 1);
        assert_eq!(data.device_state, 6);

        let mut bytes = vec![0u8; 40];
        bytes[8..16].copy_from_slice(&0xbeef0000u64.to_le_bytes());
        bytes[32..36].copy_from_slice(&3u32.to_le_bytes());
        let (data, size) =
            D3D12_DEVICE_REMOVED_EXTENDED_DATA3::try_from_ctx(&bytes, LAYOUT32).unwrap();
        assert_eq!(size, 40);
        assert_eq!(data.page_fault_output.page_fault_va, 0xbeef0000);
        assert_eq!(data.device_state, 3);
    }

    #[test]
    fn test_short_buffer() {
        let bytes = [0u8; 12];
        assert!(bytes
            .pread_with::<D3D12_DRED_ALLOCATION_NODE>(0, LAYOUT64)
            .is_err());
    }

    #[test]
    fn test_enum_schema() {
        assert_eq!(D3D12_AUTO_BREADCRUMB_OP::NAME, "D3D12_AUTO_BREADCRUMB_OP");
        assert_eq!(
            D3D12_AUTO_BREADCRUMB_OP::ENUMERANTS[3],
            ("D3D12_AUTO_BREADCRUMB_OP_DRAWINSTANCED", 3)
        );
        assert_eq!(
            D3D12_AUTO_BREADCRUMB_OP::ENUMERANTS.last(),
            Some(&("D3D12_AUTO_BREADCRUMB_OP_PROCESSFRAMES2", 49))
        );
        assert_eq!(
            D3D12_AUTO_BREADCRUMB_OP::from_u32(47),
            Some(D3D12_AUTO_BREADCRUMB_OP::D3D12_AUTO_BREADCRUMB_OP_DISPATCHGRAPH)
        );
        assert_eq!(D3D12_AUTO_BREADCRUMB_OP::from_u32(50), None);
        assert_eq!(
            D3D12_DRED_ALLOCATION_TYPE::ENUMERANTS.last(),
            Some(&("D3D12_DRED_ALLOCATION_TYPE_INVALID", 0xffffffff))
        );
    }
}
