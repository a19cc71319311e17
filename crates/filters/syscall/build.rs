fn main() {
    if let Err(err) = bpf_builder::build("syscall", "probes/syscall.bpf.c") {
        panic!("compiling syscall probe: {err}");
    }
}
