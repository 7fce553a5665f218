// Copyright 2016 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Synthetic DRED payloads for testing.
//!
//! This intentionally doesn't use dred-common's layouts so that we can catch incorrect
//! changes to dred-common itself. Structures are written field by field with the padding a C
//! compiler would insert for the chosen pointer width.
//!
//! Basic usage is to make a [`SynthImage`], build the structures you want with the types in
//! this crate, linking them together with their [`MemoryItem::address`] labels, [`add`] them
//! to the image and then [`finish`] it to get the bytes of one contiguous memory region.
//!
//! [`add`]: SynthImage::add
//! [`finish`]: SynthImage::finish

// Some test_assembler types do not have Debug, so be a bit more lenient here.
#![allow(missing_debug_implementations)]

use dred_common::format::PointerWidth;
use test_assembler::*;

/// How the structures should be laid out.
#[derive(Copy, Clone, Debug)]
pub struct SynthLayout {
    pub endian: Endian,
    pub pointer_width: PointerWidth,
}

impl SynthLayout {
    pub fn new(endian: Endian, pointer_width: PointerWidth) -> SynthLayout {
        SynthLayout {
            endian,
            pointer_width,
        }
    }

    fn pointer_size(&self) -> u64 {
        match self.pointer_width {
            PointerWidth::Bits32 => 4,
            PointerWidth::Bits64 => 8,
        }
    }
}

impl Default for SynthLayout {
    fn default() -> SynthLayout {
        SynthLayout::new(Endian::Little, PointerWidth::Bits64)
    }
}

/// A label whose value is a null pointer.
pub fn null() -> Label {
    let label = Label::new();
    label.set_const(0);
    label
}

/// Something that can be placed in a [`SynthImage`].
pub trait MemoryItem {
    /// A label for the address this item ends up at.
    fn address(&self) -> Label;
}

macro_rules! impl_memoryitem {
    ( $x:ty ) => {
        impl MemoryItem for $x {
            fn address(&self) -> Label {
                self.section.start()
            }
        }
    };
}

/// Additional methods to make writing C structures simpler.
trait SectionExtra {
    /// Pad with zeroes up to a multiple of `alignment`.
    fn align_to(self, alignment: u64) -> Self;
    /// Append a pointer-sized field, aligned for `layout`.
    fn pointer(self, layout: &SynthLayout, value: &Label) -> Self;
    /// Append a `UINT`, aligned to 4.
    fn uint(self, value: u32) -> Self;
    /// Append a `UINT64`, aligned to 8.
    fn uint64(self, value: u64) -> Self;
}

impl SectionExtra for Section {
    fn align_to(self, alignment: u64) -> Self {
        let padding = (alignment - self.size() % alignment) % alignment;
        self.append_repeated(0, padding as usize)
    }
    fn pointer(self, layout: &SynthLayout, value: &Label) -> Self {
        match layout.pointer_width {
            PointerWidth::Bits32 => self.align_to(4).D32(value),
            PointerWidth::Bits64 => self.align_to(8).D64(value),
        }
    }
    fn uint(self, value: u32) -> Self {
        self.align_to(4).D32(value)
    }
    fn uint64(self, value: u64) -> Self {
        self.align_to(8).D64(value)
    }
}

/// A contiguous region of memory holding DRED structures.
pub struct SynthImage {
    section: Section,
    base_address: u64,
}

impl SynthImage {
    /// Create an image that starts at `base_address`, which should be 8-byte aligned.
    pub fn new(layout: SynthLayout, base_address: u64) -> SynthImage {
        let section = Section::with_endian(layout.endian);
        section.start().set_const(base_address);
        SynthImage {
            section,
            base_address,
        }
    }

    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    /// Append `item` to the image, 8-byte aligned, binding its address label.
    // Perhaps should have been called .add_item().
    #[allow(clippy::should_implement_trait)]
    pub fn add<T>(mut self, item: T) -> SynthImage
    where
        T: MemoryItem + Into<Section>,
    {
        let address = item.address();
        self.section = self.section.align_to(8).mark(&address).append_section(item);
        self
    }

    /// Get the contents of the image.
    pub fn finish(self) -> Option<Vec<u8>> {
        self.section.get_contents()
    }
}

/// A `D3D12_VERSIONED_DEVICE_REMOVED_EXTENDED_DATA`.
pub struct VersionedPayload {
    section: Section,
}

/// The page fault output embedded in DRED 1.1 and later.
pub struct PageFaultOutput {
    pub page_fault_va: u64,
    pub head_existing_allocation_node: Label,
    pub head_recent_freed_allocation_node: Label,
    /// Only written for DRED 1.3.
    pub page_fault_flags: u32,
}

impl PageFaultOutput {
    pub fn new(page_fault_va: u64) -> PageFaultOutput {
        PageFaultOutput {
            page_fault_va,
            head_existing_allocation_node: null(),
            head_recent_freed_allocation_node: null(),
            page_fault_flags: 0,
        }
    }

    pub fn existing(mut self, head: &Label) -> PageFaultOutput {
        self.head_existing_allocation_node = head.clone();
        self
    }

    pub fn recent_freed(mut self, head: &Label) -> PageFaultOutput {
        self.head_recent_freed_allocation_node = head.clone();
        self
    }

    pub fn flags(mut self, page_fault_flags: u32) -> PageFaultOutput {
        self.page_fault_flags = page_fault_flags;
        self
    }

    fn cite_in(&self, layout: &SynthLayout, section: Section, with_flags: bool) -> Section {
        let section = section
            .uint64(self.page_fault_va)
            .pointer(layout, &self.head_existing_allocation_node)
            .pointer(layout, &self.head_recent_freed_allocation_node);
        let section = if with_flags {
            section.uint(self.page_fault_flags)
        } else {
            section
        };
        section.align_to(8)
    }
}

impl VersionedPayload {
    fn envelope(layout: &SynthLayout, version: u32) -> Section {
        // The union holds a UINT64 in every version but 1.0, so it always starts at 8.
        Section::with_endian(layout.endian).D32(version).D32(0)
    }

    /// An envelope with an arbitrary version tag and `body_size` bytes of zeroes after it.
    pub fn with_version(layout: &SynthLayout, version: u32, body_size: usize) -> VersionedPayload {
        let section = Self::envelope(layout, version).append_repeated(0, body_size);
        VersionedPayload { section }
    }

    /// DRED 1.0: flags and `D3D12_AUTO_BREADCRUMB_NODE`s.
    pub fn dred1_0(layout: &SynthLayout, flags: u32, head: &Label) -> VersionedPayload {
        let section = Self::envelope(layout, 1)
            .uint(flags)
            .pointer(layout, head)
            .align_to(layout.pointer_size());
        VersionedPayload { section }
    }

    /// DRED 1.1 (`version` 2) or 1.2 (`version` 3), which share a layout.
    pub fn dred1_1(
        layout: &SynthLayout,
        version: u32,
        device_removed_reason: u32,
        head: &Label,
        page_fault: &PageFaultOutput,
    ) -> VersionedPayload {
        let section = Self::envelope(layout, version)
            .uint(device_removed_reason)
            .pointer(layout, head)
            .align_to(8);
        let section = page_fault.cite_in(layout, section, false);
        VersionedPayload { section }
    }

    /// DRED 1.3.
    pub fn dred1_3(
        layout: &SynthLayout,
        device_removed_reason: u32,
        head: &Label,
        page_fault: &PageFaultOutput,
        device_state: u32,
    ) -> VersionedPayload {
        let section = Self::envelope(layout, 4)
            .uint(device_removed_reason)
            .pointer(layout, head)
            .align_to(8);
        let section = page_fault
            .cite_in(layout, section, true)
            .uint(device_state)
            .align_to(8);
        VersionedPayload { section }
    }
}

impl_memoryitem!(VersionedPayload);

impl From<VersionedPayload> for Section {
    fn from(payload: VersionedPayload) -> Self {
        payload.section
    }
}

/// A `D3D12_AUTO_BREADCRUMB_NODE`, or with [`BreadcrumbNode::contexts`] a
/// `D3D12_AUTO_BREADCRUMB_NODE1`.
pub struct BreadcrumbNode {
    section: Section,
    layout: SynthLayout,
    command_list_debug_name_a: Label,
    command_list_debug_name_w: Label,
    command_queue_debug_name_a: Label,
    command_queue_debug_name_w: Label,
    command_list: u64,
    command_queue: u64,
    breadcrumb_count: u32,
    last_breadcrumb_value: Label,
    command_history: Label,
    next: Label,
    contexts: Option<(u32, Label)>,
}

impl BreadcrumbNode {
    pub fn new(layout: &SynthLayout) -> BreadcrumbNode {
        BreadcrumbNode {
            section: Section::with_endian(layout.endian),
            layout: *layout,
            command_list_debug_name_a: null(),
            command_list_debug_name_w: null(),
            command_queue_debug_name_a: null(),
            command_queue_debug_name_w: null(),
            command_list: 0,
            command_queue: 0,
            breadcrumb_count: 0,
            last_breadcrumb_value: null(),
            command_history: null(),
            next: null(),
            contexts: None,
        }
    }

    pub fn command_list_name_a(mut self, name: &Label) -> Self {
        self.command_list_debug_name_a = name.clone();
        self
    }

    pub fn command_list_name_w(mut self, name: &Label) -> Self {
        self.command_list_debug_name_w = name.clone();
        self
    }

    pub fn command_queue_name_a(mut self, name: &Label) -> Self {
        self.command_queue_debug_name_a = name.clone();
        self
    }

    pub fn command_queue_name_w(mut self, name: &Label) -> Self {
        self.command_queue_debug_name_w = name.clone();
        self
    }

    pub fn objects(mut self, command_list: u64, command_queue: u64) -> Self {
        self.command_list = command_list;
        self.command_queue = command_queue;
        self
    }

    /// Set `BreadcrumbCount`, the number of operations ever issued.
    pub fn breadcrumb_count(mut self, count: u32) -> Self {
        self.breadcrumb_count = count;
        self
    }

    /// Point `pLastBreadcrumbValue` at the completed counter.
    pub fn last_breadcrumb_value(mut self, counter: &Label) -> Self {
        self.last_breadcrumb_value = counter.clone();
        self
    }

    pub fn command_history(mut self, history: &Label) -> Self {
        self.command_history = history.clone();
        self
    }

    pub fn next(mut self, next: &Label) -> Self {
        self.next = next.clone();
        self
    }

    /// Make this a `D3D12_AUTO_BREADCRUMB_NODE1` with `count` contexts at `contexts`.
    pub fn contexts(mut self, count: u32, contexts: &Label) -> Self {
        self.contexts = Some((count, contexts.clone()));
        self
    }

    /// Make this a `D3D12_AUTO_BREADCRUMB_NODE1` without any contexts.
    pub fn node1(self) -> Self {
        self.contexts(0, &null())
    }
}

impl_memoryitem!(BreadcrumbNode);

impl From<BreadcrumbNode> for Section {
    fn from(node: BreadcrumbNode) -> Self {
        let layout = &node.layout;
        let mut section = node
            .section
            .pointer(layout, &node.command_list_debug_name_a)
            .pointer(layout, &node.command_list_debug_name_w)
            .pointer(layout, &node.command_queue_debug_name_a)
            .pointer(layout, &node.command_queue_debug_name_w)
            .pointer(layout, &const_label(node.command_list))
            .pointer(layout, &const_label(node.command_queue))
            .uint(node.breadcrumb_count)
            .pointer(layout, &node.last_breadcrumb_value)
            .pointer(layout, &node.command_history)
            .pointer(layout, &node.next);
        if let Some((count, contexts)) = &node.contexts {
            section = section.uint(*count).pointer(layout, contexts);
        }
        section.align_to(layout.pointer_size())
    }
}

fn const_label(value: u64) -> Label {
    let label = Label::new();
    label.set_const(value);
    label
}

/// An array of `UINT`s: a command history, or the completed counter it's paired with.
pub struct Uints {
    section: Section,
}

impl Uints {
    pub fn new(layout: &SynthLayout, values: &[u32]) -> Uints {
        let section = values
            .iter()
            .fold(Section::with_endian(layout.endian), |section, &value| {
                section.D32(value)
            });
        Uints { section }
    }

    /// A single `UINT`.
    pub fn value(layout: &SynthLayout, value: u32) -> Uints {
        Uints::new(layout, &[value])
    }
}

impl_memoryitem!(Uints);

impl From<Uints> for Section {
    fn from(uints: Uints) -> Self {
        uints.section
    }
}

/// A NUL-terminated narrow string.
pub struct NarrowString {
    section: Section,
}

impl NarrowString {
    pub fn new(layout: &SynthLayout, s: &str) -> NarrowString {
        let section = Section::with_endian(layout.endian)
            .append_bytes(s.as_bytes())
            .D8(0);
        NarrowString { section }
    }
}

impl_memoryitem!(NarrowString);

impl From<NarrowString> for Section {
    fn from(string: NarrowString) -> Self {
        string.section
    }
}

/// A NUL-terminated UTF-16 string.
pub struct WideString {
    section: Section,
}

impl WideString {
    pub fn new(layout: &SynthLayout, s: &str) -> WideString {
        let section = s
            .encode_utf16()
            .fold(Section::with_endian(layout.endian), |section, unit| {
                section.D16(unit)
            })
            .D16(0);
        WideString { section }
    }
}

impl_memoryitem!(WideString);

impl From<WideString> for Section {
    fn from(string: WideString) -> Self {
        string.section
    }
}

/// An array of `D3D12_DRED_BREADCRUMB_CONTEXT`s.
pub struct BreadcrumbContexts {
    section: Section,
    layout: SynthLayout,
    count: u32,
}

impl BreadcrumbContexts {
    pub fn new(layout: &SynthLayout) -> BreadcrumbContexts {
        BreadcrumbContexts {
            section: Section::with_endian(layout.endian),
            layout: *layout,
            count: 0,
        }
    }

    /// Append a context for command history slot `breadcrumb_index`.
    pub fn add(mut self, breadcrumb_index: u32, context_string: &Label) -> Self {
        let layout = self.layout;
        self.section = self
            .section
            .uint(breadcrumb_index)
            .pointer(&layout, context_string)
            .align_to(layout.pointer_size());
        self.count += 1;
        self
    }

    /// How many contexts were added.
    pub fn count(&self) -> u32 {
        self.count
    }
}

impl_memoryitem!(BreadcrumbContexts);

impl From<BreadcrumbContexts> for Section {
    fn from(contexts: BreadcrumbContexts) -> Self {
        contexts.section
    }
}

/// A `D3D12_DRED_ALLOCATION_NODE`, or with [`AllocationNode::object`] a
/// `D3D12_DRED_ALLOCATION_NODE1`.
pub struct AllocationNode {
    section: Section,
    layout: SynthLayout,
    object_name_a: Label,
    object_name_w: Label,
    allocation_type: u32,
    next: Label,
    object: Option<u64>,
}

impl AllocationNode {
    pub fn new(layout: &SynthLayout, allocation_type: u32) -> AllocationNode {
        AllocationNode {
            section: Section::with_endian(layout.endian),
            layout: *layout,
            object_name_a: null(),
            object_name_w: null(),
            allocation_type,
            next: null(),
            object: None,
        }
    }

    pub fn name_a(mut self, name: &Label) -> Self {
        self.object_name_a = name.clone();
        self
    }

    pub fn name_w(mut self, name: &Label) -> Self {
        self.object_name_w = name.clone();
        self
    }

    pub fn next(mut self, next: &Label) -> Self {
        self.next = next.clone();
        self
    }

    /// Make this a `D3D12_DRED_ALLOCATION_NODE1` pointing at `object`.
    pub fn object(mut self, object: u64) -> Self {
        self.object = Some(object);
        self
    }
}

impl_memoryitem!(AllocationNode);

impl From<AllocationNode> for Section {
    fn from(node: AllocationNode) -> Self {
        let layout = &node.layout;
        let mut section = node
            .section
            .pointer(layout, &node.object_name_a)
            .pointer(layout, &node.object_name_w)
            .uint(node.allocation_type)
            .pointer(layout, &node.next);
        if let Some(object) = node.object {
            section = section.pointer(layout, &const_label(object));
        }
        section.align_to(layout.pointer_size())
    }
}
