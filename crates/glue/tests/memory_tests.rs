//! Integration tests for allocation, contiguous regions and packet chains.

mod common;

use common::{TestEnv, pattern};
use kport::mbuf::{copy_from_chain, release, wrap_into_buffer};
use kport::mem::release as release_block;
use kport::mem::{allocate, allocate_contiguous, release_contiguous, translate_to_physical};
use kport::{ChainTruncated, GlueError, bcopy, bzero};
use kport_utils::PAGE_SIZE;

/// Zero-filled blocks read as zero before any write, whatever the size.
#[test]
fn test_zero_fill_any_size() {
    for size in [1, 2, 15, 16, 17, 255, 4096, 4097, 100_000] {
        let mut block = allocate(size, true, true).unwrap();
        assert!(block.as_slice().iter().all(|&b| b == 0), "size {size}");
        block.as_mut_slice().fill(0xFF);
        release_block(block);
    }
}

/// 10000 bytes reserve four pages and translate to a real physical address.
#[test]
fn test_contiguous_10000_bytes() {
    let env = TestEnv::new();
    let frames = env.target.frames();
    let before = frames.free_page_count();

    let region = allocate_contiguous(frames, 10_000, PAGE_SIZE).unwrap();
    assert_eq!(region.reserved(), 16_384);
    assert_eq!(before - frames.free_page_count(), 4);
    let pa = translate_to_physical(frames, region.as_ptr()).unwrap();
    assert_ne!(pa, 0);
    assert_eq!(pa % PAGE_SIZE as u64, 0);

    release_contiguous(frames, region).unwrap();
    assert_eq!(frames.free_page_count(), before);
}

/// Two links of 50 and 30 bytes; 40 bytes from offset 40 span the boundary.
#[test]
fn test_chain_copy_across_links() {
    let env = TestEnv::new();
    let first = pattern(50, 0);
    let second = pattern(30, 0x80);
    let mut chain = wrap_into_buffer(&first, 50, 0, &env.dev).unwrap();
    chain.set_next(wrap_into_buffer(&second, 30, 0, &env.dev).unwrap());
    assert_eq!(chain.chain_len(), 80);

    let mut dest = [0u8; 40];
    assert_eq!(copy_from_chain(&chain, 40, 40, &mut dest), Ok(40));
    assert_eq!(&dest[..10], &first[40..]);
    assert_eq!(&dest[10..], &second[..]);

    release(chain);
    assert_eq!(env.dev.live_skbs(), 0);
}

/// A copy past the end writes the prefix, never more, and says so.
#[test]
fn test_chain_copy_truncation() {
    let env = TestEnv::new();
    let mut chain = wrap_into_buffer(&pattern(50, 0), 50, 0, &env.dev).unwrap();
    chain.set_next(wrap_into_buffer(&pattern(30, 0x80), 30, 0, &env.dev).unwrap());

    let mut dest = [0xAAu8; 40];
    let err = copy_from_chain(&chain, 60, 40, &mut dest).unwrap_err();
    assert_eq!(err, ChainTruncated { copied: 20 });
    assert_eq!(&dest[..20], &pattern(30, 0x80)[10..]);
    assert!(dest[20..].iter().all(|&b| b == 0xAA));
    assert_eq!(GlueError::from(err).to_status(), -14);
    release(chain);
}

#[test]
fn test_byte_helpers() {
    let mut buf = pattern(8, 1);
    bzero(&mut buf[..4]);
    assert_eq!(buf, [0, 0, 0, 0, 5, 6, 7, 8]);
    bcopy(&[9; 4], &mut buf);
    assert_eq!(buf, [9, 9, 9, 9, 5, 6, 7, 8]);
}
