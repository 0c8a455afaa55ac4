use std::sync::LazyLock;

/// The number of characters of a string which are printed before it is truncated.
pub const PRINT_STRING_LIMIT: usize = 160;

/// The number of bytes of a binary value which are printed before it is truncated.
pub const PRINT_BINDATA_LIMIT: usize = 80;

/// The number of array elements or object fields which contribute to a hash.
pub const HASH_CONTAINER_PREFIX: usize = 4;

/// The number of compiled regular expressions which are cached.
pub static REGEX_CACHE_SIZE: LazyLock<usize> =
	lazy_env_parse!("SBE_REGEX_CACHE_SIZE", usize, 1_000);

/// The maximum compiled size of a regular expression, in bytes.
pub static REGEX_SIZE_LIMIT: LazyLock<usize> =
	lazy_env_parse!("SBE_REGEX_SIZE_LIMIT", usize, 10_485_760);

/// The largest fraction of a collection which `$sample` may request before the random cursor is
/// abandoned in favour of a full scan followed by a top-k sort.
pub static SAMPLE_MAX_RATIO: LazyLock<f64> = lazy_env_parse!("SBE_SAMPLE_MAX_RATIO", f64, 0.05);

/// Collections with this many records or fewer never use a random cursor for `$sample`.
pub static SAMPLE_MIN_COLLECTION_SIZE: LazyLock<u64> =
	lazy_env_parse!("SBE_SAMPLE_MIN_COLLECTION_SIZE", u64, 100);

/// The number of documents inspected during the random cursor trial period.
pub static SAMPLE_MAX_PRESAMPLE_SIZE: LazyLock<u64> =
	lazy_env_parse!("SBE_SAMPLE_MAX_PRESAMPLE_SIZE", u64, 100);

/// The additional trial work granted when the trial runs over time-series buckets.
pub static SAMPLE_BUCKET_PRESAMPLE_OFFSET: LazyLock<u64> =
	lazy_env_parse!("SBE_SAMPLE_BUCKET_PRESAMPLE_OFFSET", u64, 5);

/// The maximum number of measurements which may be stored in a single time-series bucket.
pub static TIMESERIES_BUCKET_MAX_COUNT: LazyLock<u64> =
	lazy_env_parse!("SBE_TIMESERIES_BUCKET_MAX_COUNT", u64, 1_000);

/// The coefficient which scales the bucket limit when deciding whether to sample buckets.
pub static TIMESERIES_SAMPLE_COEFFICIENT: LazyLock<f64> =
	lazy_env_parse!("SBE_TIMESERIES_SAMPLE_COEFFICIENT", f64, 0.01);

/// The coefficient which scales the bucket limit during the bucket sampling trial.
pub static TIMESERIES_TRIAL_COEFFICIENT: LazyLock<f64> =
	lazy_env_parse!("SBE_TIMESERIES_TRIAL_COEFFICIENT", f64, 0.02);

/// The assumed minimum fullness of a bucket during the bucket sampling trial.
pub static TIMESERIES_MIN_BUCKET_FULLNESS: LazyLock<f64> =
	lazy_env_parse!("SBE_TIMESERIES_MIN_BUCKET_FULLNESS", f64, 0.25);

/// The distance multiplier applied by `$geoNear` when none is specified.
pub static GEO_NEAR_DEFAULT_MULTIPLIER: LazyLock<f64> =
	lazy_env_parse!("SBE_GEO_NEAR_DEFAULT_MULTIPLIER", f64, 1.0);

/// The maximum number of documents which a blocking `$sort` or `$group` may buffer.
pub static MAX_BUFFERED_DOCUMENTS: LazyLock<usize> =
	lazy_env_parse!("SBE_MAX_BUFFERED_DOCUMENTS", usize, 1_000_000);

/// The number of documents a `$cursor` stage pulls from its executor between yields.
pub static CURSOR_BATCH_SIZE: LazyLock<usize> = lazy_env_parse!("SBE_CURSOR_BATCH_SIZE", usize, 101);
