//! Packet buffers and chains.
//!
//! A [`PacketBuffer`] owns one target socket buffer. Buffers link into a
//! singly linked chain through `next_in_chain`; the chain head owns the
//! rest, so releasing the head releases the whole chain.
//!
//! ## Behaviors
//! - [B1] chain copies follow links and stop at the chain's end
//! - [B2] a copy past the end writes the available prefix and reports truncation
//! - [B3] wrapping copies the bytes, sets the length, and classifies the frame
//! - [B4] release hands every link back to the target

extern crate alloc;

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;

use kport_hal::skbuff::{NetDevice, SkBuff, dev_kfree_skb_any, eth_type_trans, netdev_alloc_skb};

use crate::error::GlueError;

/// One packet segment plus the rest of its chain.
#[derive(Debug)]
pub struct PacketBuffer {
    skb: Box<SkBuff>,
}

impl PacketBuffer {
    /// Bytes in this segment.
    pub fn len(&self) -> usize {
        self.skb.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skb.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        self.skb.data()
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.skb.data_mut()
    }

    /// Ethernet protocol in host order.
    pub fn protocol(&self) -> u16 {
        self.skb.protocol
    }

    pub fn device(&self) -> Option<&Arc<NetDevice>> {
        self.skb.dev()
    }

    /// Free space in front of the data.
    pub fn headroom(&self) -> usize {
        self.skb.headroom()
    }

    /// Data of the next link, if any.
    pub fn next_in_chain(&self) -> Option<&[u8]> {
        self.skb.next.as_deref().map(SkBuff::data)
    }

    /// Append `next` after this segment, returning the link it replaced.
    pub fn set_next(&mut self, next: PacketBuffer) -> Option<PacketBuffer> {
        self.skb
            .next
            .replace(next.skb)
            .map(|skb| PacketBuffer { skb })
    }

    /// Unlink and return the rest of the chain.
    pub fn take_next(&mut self) -> Option<PacketBuffer> {
        self.skb.next.take().map(|skb| PacketBuffer { skb })
    }

    /// Append `tail` at the end of the chain.
    pub fn push_back(&mut self, tail: PacketBuffer) {
        let mut link = &mut self.skb.next;
        while let Some(skb) = link {
            link = &mut skb.next;
        }
        *link = Some(tail.skb);
    }

    /// Segment data from this link to the end of the chain.
    pub fn segments(&self) -> Segments<'_> {
        Segments {
            next: Some(&self.skb),
        }
    }

    /// Total bytes across the chain.
    pub fn chain_len(&self) -> usize {
        self.segments().map(<[u8]>::len).sum()
    }

    /// Number of links.
    pub fn chain_count(&self) -> usize {
        self.segments().count()
    }
}

/// Iterator over the data of each link.
pub struct Segments<'a> {
    next: Option<&'a SkBuff>,
}

impl<'a> Iterator for Segments<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let skb = self.next?;
        self.next = skb.next.as_deref();
        Some(skb.data())
    }
}

/// A chain copy ran out of data after `copied` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTruncated {
    pub copied: usize,
}

impl fmt::Display for ChainTruncated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain truncated after {} bytes", self.copied)
    }
}

impl From<ChainTruncated> for GlueError {
    fn from(_: ChainTruncated) -> Self {
        GlueError::ChainTruncated
    }
}

/// [B1] [B2] Copy `length` bytes starting at logical `offset` of `chain`
/// into `dest` (`m_copydata`).
///
/// `length` is first capped at `dest.len()`: a short `dest` is not an
/// error, and `Ok(n)` with `n < length` means the destination filled up.
/// Callers that need the whole range check `n` against what they asked for.
/// When the chain ends before the (capped) range does, the available prefix
/// is copied and reported as [`ChainTruncated`].
pub fn copy_from_chain(
    chain: &PacketBuffer,
    offset: usize,
    length: usize,
    dest: &mut [u8],
) -> Result<usize, ChainTruncated> {
    let length = length.min(dest.len());
    let mut skip = offset;
    let mut copied = 0;
    for seg in chain.segments() {
        if copied == length {
            break;
        }
        if skip >= seg.len() {
            skip -= seg.len();
            continue;
        }
        let n = (seg.len() - skip).min(length - copied);
        dest[copied..copied + n].copy_from_slice(&seg[skip..skip + n]);
        copied += n;
        skip = 0;
    }
    if copied < length {
        log::trace!("copy_from_chain: wanted {length} at {offset}, got {copied}");
        return Err(ChainTruncated { copied });
    }
    Ok(copied)
}

/// [B3] Build a buffer for `owner` holding a copy of `source[..length]`
/// (`m_devget`). `origin_offset` bytes of headroom are left in front of the
/// data. The protocol comes from the Ethernet header of the copied frame.
pub fn wrap_into_buffer(
    source: &[u8],
    length: usize,
    origin_offset: usize,
    owner: &Arc<NetDevice>,
) -> Option<PacketBuffer> {
    let Some(bytes) = source.get(..length) else {
        log::error!("wrap_into_buffer: {length} bytes requested from {}", source.len());
        return None;
    };
    let mut skb = netdev_alloc_skb(owner, length.checked_add(origin_offset)?)?;
    // length is set before the copy
    skb.reserve(origin_offset).ok()?;
    skb.put(length).ok()?;
    skb.copy_to_linear_data_offset(0, bytes).ok()?;
    skb.protocol = eth_type_trans(&mut skb, owner);
    Some(PacketBuffer { skb })
}

/// [B4] Return `buffer` and the rest of its chain (`m_freem`).
pub fn release(buffer: PacketBuffer) {
    dev_kfree_skb_any(buffer.skb);
}
