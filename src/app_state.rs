use crate::cli::CommandLineArgs;
use crate::loader::DatasetLoader;
use crate::response_cache::ResponseCache;

use std::sync::Arc;
use std::time::Duration;

use expanduser::expanduser;

/// Shared application state passed to each chart request handler.
pub struct AppState {
    /// Command line arguments.
    pub args: CommandLineArgs,

    /// Dataset loader.
    pub loader: DatasetLoader,
}

impl AppState {
    /// Create and return an [AppState].
    pub fn new(args: &CommandLineArgs) -> Self {
        let cache_path = expanduser(&args.cache_file)
            .expect("Failed to expand ~ to user name. Please provide an absolute path instead.");
        let cache = ResponseCache::new(cache_path, args.cache_expiry);
        let loader = DatasetLoader::new(
            args.base_url.clone(),
            cache,
            Duration::from_secs(args.request_timeout),
        );

        Self {
            args: args.clone(),
            loader,
        }
    }
}

/// AppState wrapped in an Atomic Reference Count (Arc) to allow multiple references.
pub type SharedAppState = Arc<AppState>;
