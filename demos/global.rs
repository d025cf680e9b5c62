use tagheap::global;

fn main() {
    // Single threaded program, so the no-concurrent-access contract of the
    // global interface holds trivially.
    unsafe {
        global::init(8192).unwrap();

        let first = global::alloc(24);
        let second = global::alloc(512);
        let third = global::alloc(24);
        println!("Allocated {first:?}, {second:?}, {third:?}");

        global::free(second).unwrap();
        println!("Freed the middle allocation, hole visible below:");
        global::display();

        // The hole is the best fit for a request of its own size.
        let reused = global::alloc(512);
        println!("Reused hole at {reused:?}");
        assert_eq!(reused, second);

        global::free(first).unwrap();
        global::free(reused).unwrap();
        global::free(third).unwrap();
        global::coalesce();

        println!("Everything freed and merged:");
        global::display();
    }
}
