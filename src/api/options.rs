use std::convert::TryFrom;
use tokio::time::Duration;

#[derive(Clone, Debug, Default)]
pub struct ReplicatedLogOptions {
    pub max_entries_per_batch: Option<usize>,
    pub append_entries_timeout: Option<Duration>,
    pub min_retry_backoff: Option<Duration>,
    pub max_retry_backoff: Option<Duration>,
}

#[derive(Clone, Debug)]
pub(crate) struct ValidatedLogOptions {
    pub max_entries_per_batch: usize,
    pub append_entries_timeout: Duration,
    pub min_retry_backoff: Duration,
    pub max_retry_backoff: Duration,
}

impl ValidatedLogOptions {
    fn validate(&self) -> Result<(), &'static str> {
        if self.max_entries_per_batch == 0 {
            return Err("Batches must be allowed to hold at least one entry");
        }
        if self.append_entries_timeout == Duration::from_millis(0) {
            return Err("AppendEntries timeout must be positive");
        }
        if self.min_retry_backoff == Duration::from_millis(0) {
            return Err("Minimum retry backoff must be positive");
        }
        if self.min_retry_backoff > self.max_retry_backoff {
            return Err("Minimum retry backoff must not exceed maximum retry backoff");
        }

        Ok(())
    }
}

impl Default for ValidatedLogOptions {
    fn default() -> Self {
        ValidatedLogOptions {
            max_entries_per_batch: 64,
            append_entries_timeout: Duration::from_secs(1),
            min_retry_backoff: Duration::from_millis(10),
            max_retry_backoff: Duration::from_secs(1),
        }
    }
}

impl TryFrom<ReplicatedLogOptions> for ValidatedLogOptions {
    type Error = &'static str;

    fn try_from(options: ReplicatedLogOptions) -> Result<Self, Self::Error> {
        let defaults = ValidatedLogOptions::default();
        let values = ValidatedLogOptions {
            max_entries_per_batch: options.max_entries_per_batch.unwrap_or(defaults.max_entries_per_batch),
            append_entries_timeout: options.append_entries_timeout.unwrap_or(defaults.append_entries_timeout),
            min_retry_backoff: options.min_retry_backoff.unwrap_or(defaults.min_retry_backoff),
            max_retry_backoff: options.max_retry_backoff.unwrap_or(defaults.max_retry_backoff),
        };

        values.validate()?;
        Ok(values)
    }
}
