pub mod directory_size;
pub mod peak_window;
pub mod snapshot;
pub mod source;
pub mod top_k;

pub use directory_size::{DirectorySizer, NativeDu, RecursiveWalk, select_sizer};
pub use peak_window::{PeakWindowRecord, compute_peak, PEAK_WINDOW_DAYS};
pub use snapshot::MetricsSnapshot;
pub use source::{MetricsSource, SqlitePlatformSource};
pub use top_k::{DailyUserRecord, TopKAction, TopKStore, TopKTracker, TOP_K_CAPACITY};
