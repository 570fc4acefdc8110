use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);
    let proto_dir = PathBuf::from("proto");

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=proto/");
    println!("cargo:rerun-if-env-changed=PROTOC");

    let mut includes = vec![proto_dir.clone()];

    // Fall back to the vendored protoc (and its well-known types) when none is provided
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
        includes.push(protoc_bin_vendored::include_path()?);
    }

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .file_descriptor_set_path(out_dir.join("ratekeeper_descriptor.bin"))
        .compile_protos(
            &[proto_dir.join("ratekeeper/v1/ratekeeper.proto")],
            &includes,
        )?;

    Ok(())
}
