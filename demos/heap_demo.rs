//! Worked example exercising every operation in the public API: init,
//! several mallocs, a couple of frees that merge and ones that don't, a
//! deliberate allocation failure, recovery via `append_pages`, and
//! teardown.

use pageheap::{Heap, BLOCK_OVERHEAD};

fn print_ptr(
  label: &str,
  ptr: Option<*mut u8>,
) {
  match ptr {
    Some(p) => println!("{label}: {p:?}"),
    None => println!("{label}: (nil)"),
  }
}

fn main() {
  println!("BLOCK_OVERHEAD: {BLOCK_OVERHEAD}");

  let mut heap = Heap::init(None).expect("failed to map initial heap");

  println!("\nINITIAL");
  println!("{}", heap.stats());

  let p1 = heap.malloc(128);
  let p2 = heap.malloc(48);
  let p3 = heap.malloc(156);
  println!("MALLOC 3");
  println!("{}", heap.stats());

  println!("POINTERS");
  print_ptr("p3", p3);
  print_ptr("p2", p2);
  print_ptr("p1", p1);

  let p4 = heap.malloc(22);
  let p5 = heap.malloc(64);
  println!("\nMALLOC 5");
  println!("{}", heap.stats());

  println!("POINTERS");
  print_ptr("p5", p5);
  print_ptr("p4", p4);
  print_ptr("p3", p3);
  print_ptr("p2", p2);
  print_ptr("p1", p1);

  heap.free(p1);
  println!("\nFREE 1");
  println!("{}", heap.stats());

  heap.free(p3);
  println!("\nFREE 3");
  println!("{}", heap.stats());

  let p3 = heap.malloc(32);
  let p1 = heap.malloc(200);

  println!("\nALLOC 3,1 AGAIN");
  println!("{}", heap.stats());

  println!("POINTERS");
  print_ptr("p1", p1);
  print_ptr("p3", p3);
  print_ptr("p5", p5);
  print_ptr("p4", p4);
  print_ptr("p2", p2);

  heap.free(p1);
  println!("\nFREE'D 1");
  println!("{}", heap.stats());

  heap.free(p2);
  println!("\nFREE'D 2");
  println!("{}", heap.stats());

  // A request larger than whatever remains in the available list: this
  // one is expected to fail.
  let huge = 8 * heap.page_bytes();
  let p1 = heap.malloc(huge);
  let p2 = heap.malloc(1024);
  println!("\nALLOC FAILS (requested {huge} bytes)");
  println!("POINTERS");
  print_ptr("p1", p1);
  print_ptr("p3", p3);
  print_ptr("p5", p5);
  print_ptr("p4", p4);
  print_ptr("p2", p2);
  println!("{}", heap.stats());

  heap.append_pages(3).expect("extension should succeed here");
  println!("\nAPPENDED PAGES");
  println!("{}", heap.stats());

  let p2 = heap.malloc(1024);
  println!("\nALLOC SUCCEEDS NOW");
  println!("POINTERS");
  print_ptr("p1", p1);
  print_ptr("p3", p3);
  print_ptr("p5", p5);
  print_ptr("p4", p4);
  print_ptr("p2", p2);
  println!("{}", heap.stats());

  heap.free(p1);
  heap.free(p2);
  heap.free(p3);
  heap.free(p4);
  heap.free(p5);

  println!("\nFREE'D EVERYTHING");
  println!("{}", heap.stats());

  heap.cleanup();
}
