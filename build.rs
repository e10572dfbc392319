fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    #[cfg(feature = "desktop")]
    tauri_build::build();
}
