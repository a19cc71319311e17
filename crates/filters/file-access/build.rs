fn main() {
    if let Err(err) = bpf_builder::build("file_access", "probes/file_access.bpf.c") {
        panic!("compiling file_access probe: {err}");
    }
}
