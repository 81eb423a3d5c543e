use std::path::PathBuf;

use anyhow::Context;
use memsleuth::report::suppress::SuppressionSet;

#[derive(Debug, clap::Parser)]
pub(crate) struct CheckSuppressCommand {
    /// Suppression file to validate.
    file: PathBuf,

    /// Frames kept per stanza before truncation.
    #[clap(long, default_value_t = 20)]
    max_frames: usize,
}

impl CheckSuppressCommand {
    pub(crate) fn run(self) -> anyhow::Result<()> {
        let mut set = SuppressionSet::new();
        let count = set
            .load_file(&self.file, self.max_frames)
            .with_context(|| format!("Loading {}", self.file.display()))?;
        println!("{}: {count} suppression(s)", self.file.display());
        Ok(())
    }
}
