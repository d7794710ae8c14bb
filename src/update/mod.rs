pub mod lodging;
pub mod nights;

pub const DB_FILE: &str = "market_stats.sqlite";

/// What a pipeline run did. A no-op (unchanged source) is success; the
/// scheduler must be able to tell it apart from an actual rebuild.
#[derive(Debug, PartialEq)]
pub enum RunOutcome {
    Updated {
        rows: usize,
        min_key: String,
        max_key: String,
    },
    NoChange,
}

impl RunOutcome {
    pub fn report(&self, pipeline: &str) {
        match self {
            RunOutcome::Updated {
                rows,
                min_key,
                max_key,
            } => {
                println!("Updated {pipeline}: rows={rows} keys={min_key}..{max_key}");
            }
            RunOutcome::NoChange => {
                println!("No change: {pipeline} source unchanged.");
            }
        }
    }
}
