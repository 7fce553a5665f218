// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

use std::io;
use std::io::prelude::*;

use num_traits::FromPrimitive;
use scroll::ctx::{SizeWith, TryFromCtx};
use scroll::Pread;
use serde_json::json;
use tracing::warn;

use dred_common::errors::HRESULT;
use dred_common::format::{self as dred, Layout};
use dred_common::format::{
    D3D12_AUTO_BREADCRUMB_NODE1, D3D12_DRED_ALLOCATION_NODE1, D3D12_DRED_ALLOCATION_TYPE,
    D3D12_DRED_DEVICE_STATE, D3D12_DRED_FLAGS, D3D12_DRED_VERSION,
};
use dred_common::traits::ChainNode;

use crate::chain::LinkedNodes;
use crate::history::{CommandHistory, CompletedOps, DredBreadcrumbContext, OutstandingOps};
use crate::names::{enum_name, select_name, NameRef};
use crate::provider::{MemoryProvider, ProviderError};
use crate::strings::{read_narrow_string, read_wide_string};

/// Errors encountered while decoding DRED.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DredError {
    #[error("Memory at {address:#x} ({length} bytes) is not mapped")]
    Unmapped { address: u64, length: usize },
    #[error("{name} is not available in module {module}")]
    SymbolUnavailable { module: String, name: String },
    #[error("Invalid or corrupt version data ({0})")]
    UnrecognizedVersion(u32),
    #[error("No loaded module declares D3D12_VERSIONED_DEVICE_REMOVED_EXTENDED_DATA")]
    SchemaUnavailable,
    #[error("D3D12DeviceRemovedExtendedData not found in any loaded symbol files")]
    PayloadNotFound,
    #[error("Malformed DRED structure")]
    DataError,
}

impl DredError {
    /// Returns just the name of the error, as a more human-friendly version of
    /// an error-code for error logging.
    pub fn name(&self) -> &'static str {
        match self {
            DredError::Unmapped { .. } => "Unmapped",
            DredError::SymbolUnavailable { .. } => "SymbolUnavailable",
            DredError::UnrecognizedVersion(_) => "UnrecognizedVersion",
            DredError::SchemaUnavailable => "SchemaUnavailable",
            DredError::PayloadNotFound => "PayloadNotFound",
            DredError::DataError => "DataError",
        }
    }
}

impl From<ProviderError> for DredError {
    fn from(err: ProviderError) -> DredError {
        match err {
            ProviderError::Unmapped { address, length } => DredError::Unmapped { address, length },
            ProviderError::SymbolUnavailable { module, name } => {
                DredError::SymbolUnavailable { module, name }
            }
        }
    }
}

/// Something wrong with the DRED data that didn't stop it from being decoded.
///
/// Every warning is also logged when it's raised.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DecodeWarning {
    #[error("Chain starting at {head:#x} was cut off after {length} nodes")]
    TruncatedChain { head: u64, length: usize },
    #[error("Couldn't read chain node at {address:#x}, ignoring the rest of the chain")]
    ChainReadFailure { address: u64 },
    #[error("Breadcrumb node {node}: {total_dropped} operations were dropped from the command history, {completed_dropped} of them completed")]
    HistoryOverflow {
        node: usize,
        total_dropped: u64,
        completed_dropped: u64,
    },
    #[error("Breadcrumb node {node}: only the last {remaining} of {} outstanding operations are available", .remaining + .dropped)]
    OutstandingOverflow {
        node: usize,
        dropped: u64,
        remaining: u64,
    },
    #[error("Breadcrumb node {node}: {completed} operations completed but only {issued} were issued")]
    CompletedExceedsIssued { node: usize, completed: u32, issued: u32 },
    #[error("Breadcrumb node {node}: couldn't read the completed count at {address:#x}")]
    UnreadableCompletedCount { node: usize, address: u64 },
    #[error("Breadcrumb node {node}: couldn't read the command history at {address:#x}")]
    UnreadableHistory { node: usize, address: u64 },
    #[error("Breadcrumb node {node}: couldn't read the breadcrumb contexts at {address:#x}")]
    UnreadableContexts { node: usize, address: u64 },
    #[error("Breadcrumb node {node}: only the first {kept} of {count} breadcrumb contexts were read")]
    TruncatedContexts { node: usize, count: u32, kept: u32 },
}

impl DecodeWarning {
    /// Returns just the name of the warning.
    pub fn name(&self) -> &'static str {
        match self {
            DecodeWarning::TruncatedChain { .. } => "TruncatedChain",
            DecodeWarning::ChainReadFailure { .. } => "ChainReadFailure",
            DecodeWarning::HistoryOverflow { .. } => "HistoryOverflow",
            DecodeWarning::OutstandingOverflow { .. } => "OutstandingOverflow",
            DecodeWarning::CompletedExceedsIssued { .. } => "CompletedExceedsIssued",
            DecodeWarning::UnreadableCompletedCount { .. } => "UnreadableCompletedCount",
            DecodeWarning::UnreadableHistory { .. } => "UnreadableHistory",
            DecodeWarning::UnreadableContexts { .. } => "UnreadableContexts",
            DecodeWarning::TruncatedContexts { .. } => "TruncatedContexts",
        }
    }
}

/// Read a `T` out of the provider at `address`.
pub(crate) fn read_struct<P, T>(provider: &P, address: u64, layout: Layout) -> Result<T, DredError>
where
    P: MemoryProvider + ?Sized,
    T: SizeWith<Layout> + for<'a> TryFromCtx<'a, Layout, Error = scroll::Error>,
{
    let bytes = provider.read_bytes(address, T::size_with(&layout))?;
    bytes
        .pread_with::<T>(0, layout)
        .map_err(|_| DredError::DataError)
}

fn read_u32s<P: MemoryProvider + ?Sized>(
    provider: &P,
    address: u64,
    count: usize,
    endian: scroll::Endian,
) -> Result<Vec<u32>, DredError> {
    if count == 0 {
        return Ok(vec![]);
    }
    let length = count.checked_mul(4).ok_or(DredError::DataError)?;
    let bytes = provider.read_bytes(address, length)?;
    (0..count)
        .map(|i| bytes.pread_with::<u32>(i * 4, endian))
        .collect::<Result<_, _>>()
        .map_err(|_| DredError::DataError)
}

/// The payload of `D3D12_VERSIONED_DEVICE_REMOVED_EXTENDED_DATA`, picked by its version tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VersionedData {
    Dred1_0(dred::D3D12_DEVICE_REMOVED_EXTENDED_DATA),
    Dred1_1(dred::D3D12_DEVICE_REMOVED_EXTENDED_DATA1),
    Dred1_2(dred::D3D12_DEVICE_REMOVED_EXTENDED_DATA2),
    Dred1_3(dred::D3D12_DEVICE_REMOVED_EXTENDED_DATA3),
}

impl VersionedData {
    /// Read the versioned envelope at `address`.
    pub fn read<P: MemoryProvider + ?Sized>(
        provider: &P,
        address: u64,
        layout: Layout,
    ) -> Result<VersionedData, DredError> {
        let tag = read_u32s(provider, address, 1, layout.endian)?[0];
        let version =
            D3D12_DRED_VERSION::from_u32(tag).ok_or(DredError::UnrecognizedVersion(tag))?;
        let body = address
            .checked_add(dred::DRED_VERSIONED_DATA_OFFSET)
            .ok_or(DredError::DataError)?;
        Ok(match version {
            D3D12_DRED_VERSION::D3D12_DRED_VERSION_1_0 => {
                VersionedData::Dred1_0(read_struct(provider, body, layout)?)
            }
            D3D12_DRED_VERSION::D3D12_DRED_VERSION_1_1 => {
                VersionedData::Dred1_1(read_struct(provider, body, layout)?)
            }
            D3D12_DRED_VERSION::D3D12_DRED_VERSION_1_2 => {
                VersionedData::Dred1_2(read_struct(provider, body, layout)?)
            }
            D3D12_DRED_VERSION::D3D12_DRED_VERSION_1_3 => {
                VersionedData::Dred1_3(read_struct(provider, body, layout)?)
            }
        })
    }

    pub fn version(&self) -> D3D12_DRED_VERSION {
        match self {
            VersionedData::Dred1_0(_) => D3D12_DRED_VERSION::D3D12_DRED_VERSION_1_0,
            VersionedData::Dred1_1(_) => D3D12_DRED_VERSION::D3D12_DRED_VERSION_1_1,
            VersionedData::Dred1_2(_) => D3D12_DRED_VERSION::D3D12_DRED_VERSION_1_2,
            VersionedData::Dred1_3(_) => D3D12_DRED_VERSION::D3D12_DRED_VERSION_1_3,
        }
    }
}

/// A command list execution segment, with its command history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DredAutoBreadcrumbNode {
    pub command_list_debug_name: Option<String>,
    pub command_queue_debug_name: Option<String>,
    /// The address of the `ID3D12GraphicsCommandList`.
    pub command_list: u64,
    /// The address of the `ID3D12CommandQueue`.
    pub command_queue: u64,
    pub history: CommandHistory,
    /// Whether this node came from a `D3D12_AUTO_BREADCRUMB_NODE1`.
    has_contexts: bool,
}

impl DredAutoBreadcrumbNode {
    /// The number of operations issued to the command list.
    pub fn breadcrumb_count(&self) -> u64 {
        self.history.issued()
    }

    /// The number of operations the GPU completed.
    pub fn completed_count(&self) -> u64 {
        self.history.completed()
    }

    /// The completed operations that are still in the command history, most recent first.
    pub fn completed_ops(&self) -> CompletedOps<'_> {
        self.history.completed_ops()
    }

    /// The operations that were issued but never completed, oldest first.
    ///
    /// When the device hung, the faulting operation is usually the first of these.
    pub fn outstanding_ops(&self) -> OutstandingOps<'_> {
        self.history.outstanding_ops()
    }

    /// The breadcrumb contexts, or `None` if this DRED version doesn't have them.
    pub fn breadcrumb_contexts(&self) -> Option<&[DredBreadcrumbContext]> {
        self.has_contexts.then(|| self.history.contexts())
    }
}

/// An allocation recorded near a page fault.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DredAllocationNode {
    pub object_name: Option<String>,
    /// A raw `D3D12_DRED_ALLOCATION_TYPE`.
    pub allocation_type: u32,
    /// The address of the allocated object (DRED 1.2 and later).
    pub object: Option<u64>,
}

impl DredAllocationNode {
    pub fn allocation_type_name(&self) -> &'static str {
        enum_name::<D3D12_DRED_ALLOCATION_TYPE>(self.allocation_type)
    }
}

/// A page fault and the allocations near the faulting address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DredPageFault {
    /// The GPU virtual address that faulted.
    pub page_fault_va: u64,
    /// Allocations that were live at the time of the fault.
    pub existing_allocations: Vec<DredAllocationNode>,
    /// Allocations that were freed shortly before the fault.
    pub recent_freed_allocations: Vec<DredAllocationNode>,
    /// Raw `D3D12_DRED_PAGE_FAULT_FLAGS` (DRED 1.3 only).
    pub page_fault_flags: Option<u32>,
}

/// Everything D3D12 recorded about a device removal.
///
/// Fields that the payload's DRED version doesn't have are `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceRemovedExtendedData {
    pub version: D3D12_DRED_VERSION,
    /// DRED 1.0 only.
    pub flags: Option<D3D12_DRED_FLAGS>,
    /// A raw `HRESULT` (DRED 1.1 and later).
    pub device_removed_reason: Option<u32>,
    /// A raw `D3D12_DRED_DEVICE_STATE` (DRED 1.3 only).
    pub device_state: Option<u32>,
    pub breadcrumb_nodes: Vec<DredAutoBreadcrumbNode>,
    /// DRED 1.1 and later.
    pub page_fault: Option<DredPageFault>,
    /// Problems with the data that decoding worked around.
    pub warnings: Vec<DecodeWarning>,
}

/// One decode pass over a payload.
struct Decoder<'p, P: ?Sized> {
    provider: &'p P,
    layout: Layout,
    capacity: u32,
    warnings: Vec<DecodeWarning>,
}

impl<'p, P> Decoder<'p, P>
where
    P: MemoryProvider + ?Sized,
{
    fn warn(&mut self, warning: DecodeWarning) {
        warn!("{}", warning);
        self.warnings.push(warning);
    }

    fn name(&self, narrow: u64, wide: u64) -> Option<String> {
        let name = match select_name(narrow, wide)? {
            NameRef::Narrow(address) => read_narrow_string(self.provider, address),
            NameRef::Wide(address) => read_wide_string(self.provider, address, self.layout.endian),
        };
        name.map_err(|e| warn!("couldn't read debug name: {}", e)).ok()
    }

    fn breadcrumb_chain<N>(&mut self, head: u64, has_contexts: bool) -> Vec<DredAutoBreadcrumbNode>
    where
        N: ChainNode
            + SizeWith<Layout>
            + for<'a> TryFromCtx<'a, Layout, Error = scroll::Error>
            + Into<D3D12_AUTO_BREADCRUMB_NODE1>,
    {
        let mut chain = LinkedNodes::<P, N>::new(self.provider, head, self.layout);
        let raw: Vec<D3D12_AUTO_BREADCRUMB_NODE1> = chain.by_ref().map(Into::into).collect();
        if let Some(warning) = chain.warning() {
            self.warnings.push(warning.clone());
        }
        raw.iter()
            .enumerate()
            .map(|(index, node)| self.breadcrumb_node(index, node, has_contexts))
            .collect()
    }

    fn breadcrumb_node(
        &mut self,
        index: usize,
        raw: &D3D12_AUTO_BREADCRUMB_NODE1,
        has_contexts: bool,
    ) -> DredAutoBreadcrumbNode {
        let issued = raw.breadcrumb_count;
        let completed =
            match read_u32s(self.provider, raw.last_breadcrumb_value, 1, self.layout.endian) {
                Ok(values) => values[0],
                Err(_) => {
                    self.warn(DecodeWarning::UnreadableCompletedCount {
                        node: index,
                        address: raw.last_breadcrumb_value,
                    });
                    0
                }
            };
        if completed > issued {
            self.warn(DecodeWarning::CompletedExceedsIssued {
                node: index,
                completed,
                issued,
            });
        }

        let slot_count = issued.min(self.capacity) as usize;
        let slots = match read_u32s(
            self.provider,
            raw.command_history,
            slot_count,
            self.layout.endian,
        ) {
            Ok(slots) => slots,
            Err(_) => {
                self.warn(DecodeWarning::UnreadableHistory {
                    node: index,
                    address: raw.command_history,
                });
                vec![]
            }
        };

        let contexts = if has_contexts {
            self.breadcrumb_contexts(index, raw)
        } else {
            vec![]
        };

        let history = CommandHistory::new(self.capacity, issued, completed, slots, contexts);
        if let Some(overflow) = history.overflow() {
            self.warn(DecodeWarning::HistoryOverflow {
                node: index,
                total_dropped: overflow.total_dropped,
                completed_dropped: overflow.completed_dropped,
            });
        }
        let dropped = history.outstanding_dropped();
        if dropped > 0 {
            self.warn(DecodeWarning::OutstandingOverflow {
                node: index,
                dropped,
                remaining: history.capacity(),
            });
        }

        DredAutoBreadcrumbNode {
            command_list_debug_name: self
                .name(raw.command_list_debug_name_a, raw.command_list_debug_name_w),
            command_queue_debug_name: self
                .name(raw.command_queue_debug_name_a, raw.command_queue_debug_name_w),
            command_list: raw.command_list,
            command_queue: raw.command_queue,
            history,
            has_contexts,
        }
    }

    fn breadcrumb_contexts(
        &mut self,
        index: usize,
        raw: &D3D12_AUTO_BREADCRUMB_NODE1,
    ) -> Vec<DredBreadcrumbContext> {
        let count = raw.breadcrumb_contexts_count;
        let kept = count.min(self.capacity);
        if kept < count {
            self.warn(DecodeWarning::TruncatedContexts {
                node: index,
                count,
                kept,
            });
        }
        if kept == 0 {
            return vec![];
        }

        let size = dred::D3D12_DRED_BREADCRUMB_CONTEXT::size_with(&self.layout);
        let contexts = self
            .provider
            .read_bytes(raw.breadcrumb_contexts, size * kept as usize)
            .ok()
            .and_then(|bytes| {
                (0..kept as usize)
                    .map(|i| {
                        bytes.pread_with::<dred::D3D12_DRED_BREADCRUMB_CONTEXT>(
                            i * size,
                            self.layout,
                        )
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .ok()
            });
        let Some(contexts) = contexts else {
            self.warn(DecodeWarning::UnreadableContexts {
                node: index,
                address: raw.breadcrumb_contexts,
            });
            return vec![];
        };

        contexts
            .into_iter()
            .map(|context| DredBreadcrumbContext {
                breadcrumb_index: context.breadcrumb_index,
                context: self.name(0, context.context_string),
            })
            .collect()
    }

    fn allocation_chain<N>(&mut self, head: u64, has_object: bool) -> Vec<DredAllocationNode>
    where
        N: ChainNode
            + SizeWith<Layout>
            + for<'a> TryFromCtx<'a, Layout, Error = scroll::Error>
            + Into<D3D12_DRED_ALLOCATION_NODE1>,
    {
        let mut chain = LinkedNodes::<P, N>::new(self.provider, head, self.layout);
        let raw: Vec<D3D12_DRED_ALLOCATION_NODE1> = chain.by_ref().map(Into::into).collect();
        if let Some(warning) = chain.warning() {
            self.warnings.push(warning.clone());
        }
        raw.iter()
            .map(|node| DredAllocationNode {
                object_name: self.name(node.object_name_a, node.object_name_w),
                allocation_type: node.allocation_type,
                object: has_object.then_some(node.object),
            })
            .collect()
    }

    fn page_fault<N>(
        &mut self,
        output: &dred::D3D12_DRED_PAGE_FAULT_OUTPUT,
        page_fault_flags: Option<u32>,
        has_object: bool,
    ) -> DredPageFault
    where
        N: ChainNode
            + SizeWith<Layout>
            + for<'a> TryFromCtx<'a, Layout, Error = scroll::Error>
            + Into<D3D12_DRED_ALLOCATION_NODE1>,
    {
        DredPageFault {
            page_fault_va: output.page_fault_va,
            existing_allocations: self
                .allocation_chain::<N>(output.head_existing_allocation_node, has_object),
            recent_freed_allocations: self
                .allocation_chain::<N>(output.head_recent_freed_allocation_node, has_object),
            page_fault_flags,
        }
    }
}

impl DeviceRemovedExtendedData {
    /// Decode the `D3D12_VERSIONED_DEVICE_REMOVED_EXTENDED_DATA` at `address`.
    pub fn decode<P: MemoryProvider + ?Sized>(
        provider: &P,
        address: u64,
        layout: Layout,
    ) -> Result<DeviceRemovedExtendedData, DredError> {
        let data = VersionedData::read(provider, address, layout)?;
        Ok(DeviceRemovedExtendedData::from_versioned(
            provider, &data, layout,
        ))
    }

    /// Decode everything `data` points to.
    ///
    /// This never fails: whatever can't be read is left out and noted in `warnings`.
    pub fn from_versioned<P: MemoryProvider + ?Sized>(
        provider: &P,
        data: &VersionedData,
        layout: Layout,
    ) -> DeviceRemovedExtendedData {
        let mut decoder = Decoder {
            provider,
            layout,
            capacity: dred::AutoBreadcrumbsCommandHistoryMax,
            warnings: vec![],
        };

        let mut flags = None;
        let mut device_removed_reason = None;
        let mut device_state = None;
        let (breadcrumb_nodes, page_fault) = match data {
            VersionedData::Dred1_0(raw) => {
                flags = Some(D3D12_DRED_FLAGS::from_bits_retain(raw.flags));
                let nodes = decoder
                    .breadcrumb_chain::<dred::D3D12_AUTO_BREADCRUMB_NODE>(
                        raw.head_auto_breadcrumb_node,
                        false,
                    );
                (nodes, None)
            }
            VersionedData::Dred1_1(raw) => {
                device_removed_reason = Some(raw.device_removed_reason);
                let nodes = decoder.breadcrumb_chain::<dred::D3D12_AUTO_BREADCRUMB_NODE>(
                    raw.head_auto_breadcrumb_node,
                    false,
                );
                let page_fault = decoder.page_fault::<dred::D3D12_DRED_ALLOCATION_NODE>(
                    &raw.page_fault_output,
                    None,
                    false,
                );
                (nodes, Some(page_fault))
            }
            VersionedData::Dred1_2(raw) => {
                device_removed_reason = Some(raw.device_removed_reason);
                let nodes = decoder.breadcrumb_chain::<D3D12_AUTO_BREADCRUMB_NODE1>(
                    raw.head_auto_breadcrumb_node,
                    true,
                );
                let page_fault = decoder.page_fault::<D3D12_DRED_ALLOCATION_NODE1>(
                    &raw.page_fault_output,
                    None,
                    true,
                );
                (nodes, Some(page_fault))
            }
            VersionedData::Dred1_3(raw) => {
                device_removed_reason = Some(raw.device_removed_reason);
                device_state = Some(raw.device_state);
                let nodes = decoder.breadcrumb_chain::<D3D12_AUTO_BREADCRUMB_NODE1>(
                    raw.head_auto_breadcrumb_node,
                    true,
                );
                let output = &raw.page_fault_output;
                let page_fault = decoder.page_fault::<D3D12_DRED_ALLOCATION_NODE1>(
                    &dred::D3D12_DRED_PAGE_FAULT_OUTPUT {
                        page_fault_va: output.page_fault_va,
                        head_existing_allocation_node: output.head_existing_allocation_node,
                        head_recent_freed_allocation_node: output
                            .head_recent_freed_allocation_node,
                    },
                    Some(output.page_fault_flags),
                    true,
                );
                (nodes, Some(page_fault))
            }
        };

        DeviceRemovedExtendedData {
            version: data.version(),
            flags,
            device_removed_reason,
            device_state,
            breadcrumb_nodes,
            page_fault,
            warnings: decoder.warnings,
        }
    }

    /// The breadcrumb nodes, in the order the runtime linked them.
    pub fn breadcrumb_nodes(&self) -> impl Iterator<Item = &DredAutoBreadcrumbNode> {
        self.breadcrumb_nodes.iter()
    }

    /// Allocations that were live when the page fault happened.
    pub fn existing_allocations(&self) -> impl Iterator<Item = &DredAllocationNode> {
        self.page_fault
            .iter()
            .flat_map(|page_fault| page_fault.existing_allocations.iter())
    }

    /// Allocations that were freed shortly before the page fault.
    pub fn recent_freed_allocations(&self) -> impl Iterator<Item = &DredAllocationNode> {
        self.page_fault
            .iter()
            .flat_map(|page_fault| page_fault.recent_freed_allocations.iter())
    }

    /// The name of `device_removed_reason`, e.g. `DXGI_ERROR_DEVICE_HUNG`.
    pub fn device_removed_reason_name(&self) -> Option<&'static str> {
        self.device_removed_reason.map(enum_name::<HRESULT>)
    }

    /// The name of `device_state`, e.g. `D3D12_DRED_DEVICE_STATE_PAGEFAULT`.
    pub fn device_state_name(&self) -> Option<&'static str> {
        self.device_state.map(enum_name::<D3D12_DRED_DEVICE_STATE>)
    }

    /// Write a human-readable description of the DRED data to `f`.
    ///
    /// This is very verbose, it is the format used by `dred-dump`.
    pub fn print<T: Write>(&self, f: &mut T) -> io::Result<()> {
        writeln!(f, "D3D12_VERSIONED_DEVICE_REMOVED_EXTENDED_DATA")?;
        writeln!(
            f,
            "  version                         = {} ({:?})",
            self.version as u32, self.version
        )?;
        if let Some(flags) = self.flags {
            writeln!(f, "  flags                           = {:#x}", flags.bits())?;
        }
        if let (Some(reason), Some(name)) =
            (self.device_removed_reason, self.device_removed_reason_name())
        {
            writeln!(f, "  device_removed_reason           = {reason:#x} ({name})")?;
        }
        if let (Some(state), Some(name)) = (self.device_state, self.device_state_name()) {
            writeln!(f, "  device_state                    = {state} ({name})")?;
        }
        writeln!(f)?;

        for (i, node) in self.breadcrumb_nodes.iter().enumerate() {
            print_breadcrumb_node(f, i, node)?;
        }

        if let Some(ref page_fault) = self.page_fault {
            writeln!(f, "D3D12_DRED_PAGE_FAULT_OUTPUT")?;
            writeln!(
                f,
                "  page_fault_va                   = {:#x}",
                page_fault.page_fault_va
            )?;
            if let Some(page_fault_flags) = page_fault.page_fault_flags {
                writeln!(f, "  page_fault_flags                = {page_fault_flags:#x}")?;
            }
            writeln!(f, "  (existing_allocations)")?;
            print_allocations(f, &page_fault.existing_allocations)?;
            writeln!(f, "  (recent_freed_allocations)")?;
            print_allocations(f, &page_fault.recent_freed_allocations)?;
            writeln!(f)?;
        }

        if !self.warnings.is_empty() {
            writeln!(f, "Warnings")?;
            for warning in &self.warnings {
                writeln!(f, "  {warning}")?;
            }
        }
        Ok(())
    }

    /// Write the DRED data to `f` as JSON.
    pub fn print_json<T: Write>(&self, f: &mut T, pretty: bool) -> Result<(), serde_json::Error> {
        fn json_hex(value: u64) -> String {
            format!("{value:#018x}")
        }

        let op_json = |op: crate::history::BreadcrumbOp| {
            json!({
                "index": op.index,
                "slot": op.slot,
                // null if the slot couldn't be read
                "op": op.op,
                "op_name": op.op_name(),
                // optional
                "context": op.context,
            })
        };
        let allocation_json = |allocation: &DredAllocationNode| {
            json!({
                "object_name": allocation.object_name,
                "allocation_type": allocation.allocation_type,
                "allocation_type_name": allocation.allocation_type_name(),
                // DRED 1.2 and later
                "object": allocation.object.map(json_hex),
            })
        };

        let output = json!({
            "version": self.version as u32,
            // DRED 1.0 only
            "flags": self.flags.map(|flags| flags.bits()),
            // DRED 1.1 and later
            "device_removed_reason": self.device_removed_reason.map(|reason| format!("{reason:#010x}")),
            "device_removed_reason_name": self.device_removed_reason_name(),
            // DRED 1.3 only
            "device_state": self.device_state,
            "device_state_name": self.device_state_name(),
            "breadcrumb_nodes": self.breadcrumb_nodes.iter().map(|node| {
                let overflow = node.history.overflow();
                json!({
                    "command_list_debug_name": node.command_list_debug_name,
                    "command_queue_debug_name": node.command_queue_debug_name,
                    "command_list": json_hex(node.command_list),
                    "command_queue": json_hex(node.command_queue),
                    "breadcrumb_count": node.breadcrumb_count(),
                    "completed_count": node.completed_count(),
                    "total_dropped": overflow.map(|o| o.total_dropped).unwrap_or(0),
                    "completed_dropped": overflow.map(|o| o.completed_dropped).unwrap_or(0),
                    "outstanding_dropped": node.history.outstanding_dropped(),
                    "outstanding_ops": node.outstanding_ops().map(op_json).collect::<Vec<_>>(),
                    "completed_ops": node.completed_ops().map(op_json).collect::<Vec<_>>(),
                    // DRED 1.2 and later
                    "breadcrumb_contexts": node.breadcrumb_contexts().map(|contexts| {
                        contexts.iter().map(|context| json!({
                            "breadcrumb_index": context.breadcrumb_index,
                            "context": context.context,
                        })).collect::<Vec<_>>()
                    }),
                })
            }).collect::<Vec<_>>(),
            // DRED 1.1 and later
            "page_fault": self.page_fault.as_ref().map(|page_fault| json!({
                "page_fault_va": json_hex(page_fault.page_fault_va),
                // DRED 1.3 only
                "page_fault_flags": page_fault.page_fault_flags,
                "existing_allocations": page_fault.existing_allocations.iter().map(allocation_json).collect::<Vec<_>>(),
                "recent_freed_allocations": page_fault.recent_freed_allocations.iter().map(allocation_json).collect::<Vec<_>>(),
            })),
            "warnings": self.warnings.iter().map(|warning| json!({
                "kind": warning.name(),
                "message": warning.to_string(),
            })).collect::<Vec<_>>(),
        });

        if pretty {
            serde_json::to_writer_pretty(f, &output)
        } else {
            serde_json::to_writer(f, &output)
        }
    }
}

fn print_breadcrumb_node<T: Write>(
    f: &mut T,
    index: usize,
    node: &DredAutoBreadcrumbNode,
) -> io::Result<()> {
    writeln!(f, "D3D12_AUTO_BREADCRUMB_NODE[{index}]")?;
    writeln!(
        f,
        "  command_list_debug_name         = {}",
        display_name(&node.command_list_debug_name)
    )?;
    writeln!(
        f,
        "  command_queue_debug_name        = {}",
        display_name(&node.command_queue_debug_name)
    )?;
    writeln!(f, "  command_list                    = {:#x}", node.command_list)?;
    writeln!(f, "  command_queue                   = {:#x}", node.command_queue)?;
    writeln!(f, "  breadcrumb_count                = {}", node.breadcrumb_count())?;
    writeln!(f, "  last_breadcrumb_value           = {}", node.completed_count())?;
    if let Some(contexts) = node.breadcrumb_contexts() {
        writeln!(f, "  breadcrumb_contexts_count       = {}", contexts.len())?;
    }
    if let Some(overflow) = node.history.overflow() {
        writeln!(
            f,
            "  (dropped)                       = {} ({} completed)",
            overflow.total_dropped, overflow.completed_dropped
        )?;
    }

    writeln!(f, "  (outstanding_ops)")?;
    for op in node.outstanding_ops() {
        print_op(f, &op)?;
    }
    writeln!(f, "  (completed_ops)")?;
    for op in node.completed_ops() {
        print_op(f, &op)?;
    }
    writeln!(f)
}

fn print_op<T: Write>(f: &mut T, op: &crate::history::BreadcrumbOp) -> io::Result<()> {
    write!(f, "    [{}] slot {:5} {}", op.index, op.slot, op.op_name())?;
    if let Some(context) = op.context {
        write!(f, " \"{context}\"")?;
    }
    writeln!(f)
}

fn print_allocations<T: Write>(f: &mut T, allocations: &[DredAllocationNode]) -> io::Result<()> {
    for (i, allocation) in allocations.iter().enumerate() {
        write!(
            f,
            "    [{}] {} {}",
            i,
            allocation.allocation_type_name(),
            display_name(&allocation.object_name)
        )?;
        if let Some(object) = allocation.object {
            write!(f, " object={object:#x}")?;
        }
        writeln!(f)?;
    }
    Ok(())
}

fn display_name(name: &Option<String>) -> String {
    match name {
        Some(name) => format!("\"{name}\""),
        None => String::from("(null)"),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::provider::MemoryImage;
    use scroll::Endian;

    const LAYOUT: Layout = Layout {
        endian: Endian::Little,
        pointer_width: dred::PointerWidth::Bits64,
    };

    fn envelope(version: u32, body: &[u8]) -> MemoryImage {
        let mut bytes = version.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0; 4]);
        bytes.extend_from_slice(body);
        MemoryImage::new().add_region(0x1000, bytes)
    }

    #[test]
    fn test_version_dispatch() {
        let body = [0u8; 56];
        for (tag, version) in [
            (1, D3D12_DRED_VERSION::D3D12_DRED_VERSION_1_0),
            (2, D3D12_DRED_VERSION::D3D12_DRED_VERSION_1_1),
            (3, D3D12_DRED_VERSION::D3D12_DRED_VERSION_1_2),
            (4, D3D12_DRED_VERSION::D3D12_DRED_VERSION_1_3),
        ] {
            let image = envelope(tag, &body);
            let data = VersionedData::read(&image, 0x1000, LAYOUT).unwrap();
            assert_eq!(data.version(), version);
        }
        for tag in [0, 5, 0xffffffff] {
            let image = envelope(tag, &body);
            assert_eq!(
                VersionedData::read(&image, 0x1000, LAYOUT),
                Err(DredError::UnrecognizedVersion(tag))
            );
        }
    }

    #[test]
    fn test_truncated_envelope() {
        // Version 1.3 needs 56 bytes of body.
        let image = envelope(4, &[0u8; 40]);
        assert_eq!(
            VersionedData::read(&image, 0x1000, LAYOUT),
            Err(DredError::Unmapped {
                address: 0x1008,
                length: 56
            })
        );
        assert_eq!(
            VersionedData::read(&image, 0x9000, LAYOUT).unwrap_err().name(),
            "Unmapped"
        );
    }

    #[test]
    fn test_empty_payload_fields_by_version() {
        let image = envelope(1, &[3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        let dred = DeviceRemovedExtendedData::decode(&image, 0x1000, LAYOUT).unwrap();
        assert_eq!(
            dred.flags,
            Some(
                D3D12_DRED_FLAGS::D3D12_DRED_FLAG_FORCE_ENABLE
                    | D3D12_DRED_FLAGS::D3D12_DRED_FLAG_DISABLE_AUTOBREADCRUMBS
            )
        );
        assert_eq!(dred.device_removed_reason, None);
        assert_eq!(dred.device_state, None);
        assert_eq!(dred.page_fault, None);
        assert!(dred.breadcrumb_nodes.is_empty());
        assert!(dred.warnings.is_empty());

        let mut body = [0u8; 56];
        body[0..4].copy_from_slice(&0x887a0006u32.to_le_bytes());
        body[48..52].copy_from_slice(&3u32.to_le_bytes());
        let image = envelope(4, &body);
        let dred = DeviceRemovedExtendedData::decode(&image, 0x1000, LAYOUT).unwrap();
        assert_eq!(dred.flags, None);
        assert_eq!(
            dred.device_removed_reason_name(),
            Some("DXGI_ERROR_DEVICE_HUNG")
        );
        assert_eq!(dred.device_state_name(), Some("D3D12_DRED_DEVICE_STATE_HUNG"));
        let page_fault = dred.page_fault.unwrap();
        assert_eq!(page_fault.page_fault_flags, Some(0));
        assert!(page_fault.existing_allocations.is_empty());
    }

    #[test]
    fn test_error_names() {
        assert_eq!(DredError::PayloadNotFound.name(), "PayloadNotFound");
        assert_eq!(
            DredError::from(ProviderError::SymbolUnavailable {
                module: String::from("d3d12"),
                name: String::from("T"),
            }),
            DredError::SymbolUnavailable {
                module: String::from("d3d12"),
                name: String::from("T"),
            }
        );
        assert_eq!(
            DredError::UnrecognizedVersion(7).to_string(),
            "Invalid or corrupt version data (7)"
        );
        assert_eq!(
            DecodeWarning::OutstandingOverflow {
                node: 0,
                dropped: 5,
                remaining: 4
            }
            .to_string(),
            "Breadcrumb node 0: only the last 4 of 9 outstanding operations are available"
        );
    }
}
