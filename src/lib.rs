// https://source.android.com/docs/core/runtime/dex-format

pub use dexmerge_dex_file as dex_file;
pub use dexmerge_dex_model as dex_model;
