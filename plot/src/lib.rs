// Plot storage engine
// On-disk key-pair plots and the identifier index over them

pub mod format;
pub mod index;

pub use format::{
    is_plot_file_name, plot_file_name, read_header, read_private_key, validate_file, write_plot,
    PlotEntry, PlotError, PlotHeader, ValidationMode, PLOT_FILE_PREFIX, PLOT_FILE_SUFFIX,
    PLOT_MAGIC,
};
pub use index::{IndexError, PlotIndex, PlotLocation, DEFAULT_BATCH_SIZE};
