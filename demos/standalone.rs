use std::ptr::NonNull;

use tagheap::Heap;

fn print_alloc(addr: NonNull<[u8]>, requested: usize) {
    println!("Requested {requested} bytes of memory");
    println!(
        "Received address {:?} with room for {} bytes",
        addr.cast::<u8>(),
        addr.len()
    );
}

fn main() {
    let mut heap = Heap::with_region_size(4096).unwrap();
    println!(
        "Mapped a {} byte region, {} bytes usable\n",
        heap.region_length(),
        heap.usable_size()
    );

    let addr1 = heap.allocate(1).unwrap();
    print_alloc(addr1, 1);

    let addr2 = heap.allocate(100).unwrap();
    print_alloc(addr2, 100);

    let addr3 = heap.allocate(1024).unwrap();
    print_alloc(addr3, 1024);

    println!("\nLayout after three allocations:");
    heap.display();

    println!("\nFreeing everything (no merging yet)...");
    unsafe {
        heap.deallocate(addr1.cast()).unwrap();
        heap.deallocate(addr2.cast()).unwrap();
        heap.deallocate(addr3.cast()).unwrap();
    }
    heap.display();

    let merges = heap.coalesce();
    println!("\nCoalesce merged {merges} adjacent pairs:");
    heap.display();
}
