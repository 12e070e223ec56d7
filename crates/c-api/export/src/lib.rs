pub use scriptvm_c_api::*;
