//! The two periodic background tasks.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::worker::BackgroundTask;

use super::{dump, gc, Core};

pub(crate) struct GcTask {
    core: Arc<Core>,
}

impl GcTask {
    pub fn new(core: Arc<Core>) -> Self {
        Self { core }
    }
}

impl BackgroundTask for GcTask {
    fn name(&self) -> &'static str {
        "log-gc"
    }

    fn interval(&self) -> Duration {
        self.core.opts.log_file_gc_interval
    }

    fn execute(&self) -> Result<()> {
        if self.core.is_closed() {
            return Ok(());
        }
        gc::run(&self.core)
    }
}

pub(crate) struct DumpTask {
    core: Arc<Core>,
}

impl DumpTask {
    pub fn new(core: Arc<Core>) -> Self {
        Self { core }
    }
}

impl BackgroundTask for DumpTask {
    fn name(&self) -> &'static str {
        "index-dump"
    }

    fn interval(&self) -> Duration {
        self.core.opts.in_memory_dump_interval
    }

    fn execute(&self) -> Result<()> {
        if self.core.is_closed() {
            return Ok(());
        }
        dump::run(&self.core)
    }
}
