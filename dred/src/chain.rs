//! Walking singly-linked lists of DRED nodes.

use std::collections::HashSet;
use std::marker::PhantomData;

use scroll::ctx::{SizeWith, TryFromCtx};
use scroll::Pread;
use tracing::warn;

use dred_common::format::Layout;
use dred_common::traits::ChainNode;

use crate::dred::DecodeWarning;
use crate::provider::MemoryProvider;

/// The longest chain [`LinkedNodes`] will walk.
pub const MAX_CHAIN_LENGTH: usize = 1_000_000;

/// An iterator over a chain of `T`s linked through [`ChainNode::next`].
///
/// The chain ends at a null link. Since the memory may be corrupt the walk also stops,
/// leaving a [`DecodeWarning`] behind in [`LinkedNodes::warning`], when:
///
/// * a node can't be read,
/// * a node links back to one already visited,
/// * the chain gets longer than [`MAX_CHAIN_LENGTH`].
pub struct LinkedNodes<'p, P: ?Sized, T> {
    provider: &'p P,
    layout: Layout,
    head: u64,
    next: u64,
    visited: HashSet<u64>,
    warning: Option<DecodeWarning>,
    max_length: usize,
    _node: PhantomData<T>,
}

impl<'p, P, T> LinkedNodes<'p, P, T>
where
    P: MemoryProvider + ?Sized,
{
    /// Walk the chain starting at `head`. A null `head` is an empty chain.
    pub fn new(provider: &'p P, head: u64, layout: Layout) -> LinkedNodes<'p, P, T> {
        LinkedNodes {
            provider,
            layout,
            head,
            next: head,
            visited: HashSet::new(),
            warning: None,
            max_length: MAX_CHAIN_LENGTH,
            _node: PhantomData,
        }
    }

    /// Stop after `max_length` nodes instead of [`MAX_CHAIN_LENGTH`].
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    /// Why the walk stopped early, if it did.
    pub fn warning(&self) -> Option<&DecodeWarning> {
        self.warning.as_ref()
    }

    /// Give up the rest of the chain with `warning`.
    fn stop(&mut self, warning: DecodeWarning) {
        warn!("{}", warning);
        self.warning = Some(warning);
        self.next = 0;
    }
}

impl<'p, P, T> Iterator for LinkedNodes<'p, P, T>
where
    P: MemoryProvider + ?Sized,
    T: ChainNode + SizeWith<Layout> + for<'a> TryFromCtx<'a, Layout, Error = scroll::Error>,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let address = self.next;
        if address == 0 {
            return None;
        }
        if !self.visited.insert(address) || self.visited.len() > self.max_length {
            self.stop(DecodeWarning::TruncatedChain {
                head: self.head,
                length: self.visited.len().min(self.max_length),
            });
            return None;
        }

        let size = T::size_with(&self.layout);
        let node = self
            .provider
            .read_bytes(address, size)
            .ok()
            .and_then(|bytes| bytes.pread_with::<T>(0, self.layout).ok());
        match node {
            Some(node) => {
                self.next = node.next();
                Some(node)
            }
            None => {
                self.stop(DecodeWarning::ChainReadFailure { address });
                None
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::provider::MemoryImage;
    use dred_common::format::D3D12_DRED_ALLOCATION_NODE;

    /// An image holding 64-bit allocation nodes at `0x1000 + 0x100 * i`, linked as `links`
    /// says, with `allocation_type` set to the node's position.
    fn image_with_links(links: &[u64]) -> MemoryImage {
        let mut bytes = vec![0u8; 0x100 * links.len()];
        for (i, &next) in links.iter().enumerate() {
            let node = &mut bytes[0x100 * i..];
            node[16..20].copy_from_slice(&(i as u32).to_le_bytes());
            node[24..32].copy_from_slice(&next.to_le_bytes());
        }
        MemoryImage::new().add_region(0x1000, bytes)
    }

    fn walk(image: &MemoryImage, head: u64) -> (Vec<u32>, Option<DecodeWarning>) {
        let mut nodes =
            LinkedNodes::<_, D3D12_DRED_ALLOCATION_NODE>::new(image, head, Layout::default());
        let types = nodes.by_ref().map(|node| node.allocation_type).collect();
        (types, nodes.warning().cloned())
    }

    #[test]
    fn test_null_head() {
        let image = image_with_links(&[0]);
        assert_eq!(walk(&image, 0), (vec![], None));
    }

    #[test]
    fn test_chain_in_order() {
        let image = image_with_links(&[0x1100, 0x1200, 0]);
        assert_eq!(walk(&image, 0x1000), (vec![0, 1, 2], None));
        assert_eq!(walk(&image, 0x1100), (vec![1, 2], None));
    }

    #[test]
    fn test_cycle_terminates() {
        let image = image_with_links(&[0x1100, 0x1000]);
        let (types, warning) = walk(&image, 0x1000);
        assert_eq!(types, vec![0, 1]);
        assert_eq!(
            warning,
            Some(DecodeWarning::TruncatedChain {
                head: 0x1000,
                length: 2
            })
        );
    }

    #[test]
    fn test_self_link() {
        let image = image_with_links(&[0x1000]);
        let (types, warning) = walk(&image, 0x1000);
        assert_eq!(types, vec![0]);
        assert!(matches!(warning, Some(DecodeWarning::TruncatedChain { .. })));
    }

    #[test]
    fn test_unreadable_link() {
        let image = image_with_links(&[0x1100, 0xdead0000]);
        let (types, warning) = walk(&image, 0x1000);
        assert_eq!(types, vec![0, 1]);
        assert_eq!(
            warning,
            Some(DecodeWarning::ChainReadFailure {
                address: 0xdead0000
            })
        );
    }

    #[test]
    fn test_length_cap() {
        let image = image_with_links(&[0x1100, 0x1200, 0x1300, 0]);
        let mut nodes =
            LinkedNodes::<_, D3D12_DRED_ALLOCATION_NODE>::new(&image, 0x1000, Layout::default())
                .with_max_length(2);
        assert_eq!(nodes.by_ref().count(), 2);
        assert_eq!(
            nodes.warning(),
            Some(&DecodeWarning::TruncatedChain {
                head: 0x1000,
                length: 2
            })
        );
    }
}
