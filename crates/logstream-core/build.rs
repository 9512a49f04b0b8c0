/// Builds the gRPC client and server code for the `logstream.proto` definition
/// using `tonic-prost-build`.
///
/// The Protocol Buffer definitions in the `proto` directory are compiled into
/// Rust modules with gRPC bindings in the crate's `OUT_DIR`. A serialized
/// `FileDescriptorSet` is written next to them so the server can expose gRPC
/// reflection.
///
/// # Files and Paths
///
/// - Proto file: `proto/logstream.proto`
/// - Includes: `proto/`
/// - Descriptor: `$OUT_DIR/logstream_descriptor.bin`
///
/// # Panics
///
/// This function will `panic!` if code generation fails.
///
/// # Output
///
/// Generated code is accessible in Rust via:
///
/// ```rust
/// pub mod proto {
///     tonic::include_proto!("logstream");
/// }
/// ```
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("logstream_descriptor.bin");

    println!("cargo:rerun-if-changed=proto/logstream.proto");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/logstream.proto"], &["proto"])
        .unwrap();
}
