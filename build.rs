fn main() {
    // Writes `built.rs` into OUT_DIR; `GIT_COMMIT_HASH` is read from it in lib.rs.
    built::write_built_file().expect("Failed to acquire build-time information");
}
