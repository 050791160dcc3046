fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Compile proto files for both node surfaces
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/eva.proto", "proto/ela.proto"], &["proto"])?;

    // Re-run if proto files change
    println!("cargo:rerun-if-changed=proto/eva.proto");
    println!("cargo:rerun-if-changed=proto/ela.proto");

    Ok(())
}
