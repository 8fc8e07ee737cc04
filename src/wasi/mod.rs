pub mod wasi_snapshot_preview1;
