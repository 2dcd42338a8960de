use std::sync::Arc;

use crate::{Allocator, Buffer, ErrorClass, HostAllocator, LruAllocator, RawBuffer};

fn allocator() -> Arc<LruAllocator> {
    Arc::new(LruAllocator::new(Box::new(HostAllocator)))
}

#[test]
fn test_host_memory_is_aligned_and_zeroed() {
    let buffer = Buffer::allocate(Arc::new(HostAllocator), 256).unwrap();
    let RawBuffer::Host(memory) = buffer.raw() else { panic!("host allocator returns host memory") };
    assert_eq!(memory.as_ptr() as usize % crate::allocator::HOST_ALIGN, 0);

    let mut bytes = vec![0xffu8; 256];
    unsafe { memory.read(0, &mut bytes) };
    assert!(bytes.iter().all(|&b| b == 0));
}

#[test]
fn test_buffer_ids_are_unique_and_shared_by_clones() {
    let alloc = allocator();
    let a = Buffer::allocate(alloc.clone(), 16).unwrap();
    let b = Buffer::allocate(alloc, 16).unwrap();
    let a2 = a.clone();

    assert_ne!(a.id(), b.id());
    assert_eq!(a.id(), a2.id());
    assert!(a.same_memory(&a2));
    assert!(!a.same_memory(&b));
}

#[test]
fn test_lru_reuses_freed_buffers() {
    let alloc = allocator();
    let ptr = {
        let buffer = Buffer::allocate(alloc.clone(), 64).unwrap();
        let RawBuffer::Host(memory) = buffer.raw() else { unreachable!() };
        memory.as_ptr() as usize
    };
    assert_eq!(alloc.cached(), 1);

    let buffer = Buffer::allocate(alloc.clone(), 64).unwrap();
    let RawBuffer::Host(memory) = buffer.raw() else { unreachable!() };
    assert_eq!(memory.as_ptr() as usize, ptr);
    assert_eq!(alloc.cached(), 0);
}

#[test]
fn test_lru_keys_by_size() {
    let alloc = allocator();
    drop(Buffer::allocate(alloc.clone(), 64).unwrap());
    let other = alloc.alloc(32).unwrap();
    assert_eq!(other.size(), 32);
    assert_eq!(alloc.cached(), 1);
}

#[test]
fn test_zero_sized_buffer() {
    let buffer = Buffer::allocate(allocator(), 0).unwrap();
    assert_eq!(buffer.size(), 0);
    buffer.check_range(0, 0).unwrap();
}

#[test]
fn test_check_range() {
    let buffer = Buffer::allocate(allocator(), 16).unwrap();
    buffer.check_range(0, 16).unwrap();
    buffer.check_range(8, 8).unwrap();

    let err = buffer.check_range(8, 9).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Transfer);
    assert!(buffer.check_range(usize::MAX, 2).is_err());
}
