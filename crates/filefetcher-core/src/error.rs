//! Configuration errors.
//!
//! Every variant here is fatal: the process logs it and exits non-zero
//! before any queue worker is started.

use std::path::PathBuf;

use thiserror::Error;

use crate::template::TemplateError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file")]
    Parse(#[from] serde_yaml::Error),

    #[error("environment variable {0} is not set")]
    MissingEnv(String),

    #[error("datalogger {logger}: low_speed_limit and low_speed_time must be configured together")]
    LowSpeedPair { logger: String },

    #[error(
        "datalogger {logger} in queue {queue} has no backfill or minimumLookback \
         and no global maxRunTime/shutdownTime is set; its sweep would never terminate"
    )]
    UnboundedSweep { queue: String, logger: String },

    #[error("datalogger {logger}: bad template")]
    Template {
        logger: String,
        #[source]
        source: TemplateError,
    },
}
