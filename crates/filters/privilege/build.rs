fn main() {
    if let Err(err) = bpf_builder::build("privilege", "probes/privilege.bpf.c") {
        panic!("compiling privilege probe: {err}");
    }
}
