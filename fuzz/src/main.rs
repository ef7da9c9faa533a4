extern crate afl;
extern crate nadvd;

use afl::fuzz;

fn main() {
    fuzz!(|data: &[u8]| {
        if let Some(proto) = nadvd::proto::classify(data) {
            match proto.module().decode(data) {
                Ok(_) => println!("ok"),
                Err(e) => eprintln!("{}", e),
            }
        }
    });
}
