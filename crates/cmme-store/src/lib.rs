pub mod codec;
pub mod config;
pub mod drex_file;
pub mod error;
pub mod idyom_file;
pub mod paths;
pub mod ppm_file;
pub mod schema;

pub use config::{CONFIG_ENV, Config, RUNTIME_ROOT_ENV};
pub use drex_file::{
    read_drex_instructions, read_drex_results, write_drex_instructions, write_drex_results,
};
pub use error::{Result, StoreError};
pub use idyom_file::{
    read_idyom_instructions, read_idyom_results, read_idyom_results_with, write_idyom_command,
    write_idyom_instructions, write_idyom_results,
};
pub use paths::{mint_path, resolve_data_path};
pub use ppm_file::{
    read_ppm_instructions, read_ppm_results, write_ppm_instructions, write_ppm_results,
};
