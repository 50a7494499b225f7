use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "placescout")]
#[command(about = "Concurrent map-search business record extraction")]
#[command(version)]
pub struct Cli {
    /// Create default configuration file at ./config/placescout.toml
    #[arg(long)]
    pub init: bool,

    /// Search query to extract (repeat for multiple queries)
    #[arg(short, long, value_name = "QUERY")]
    pub query: Vec<String>,

    /// Path to a file with one query per line ('#' lines are comments)
    #[arg(long, value_name = "FILE")]
    pub input_file: Option<String>,

    /// Number of concurrent workers (overrides config, clamped to 1-10)
    #[arg(short, long, value_name = "N")]
    pub workers: Option<usize>,

    /// Maximum records extracted per query (overrides config)
    #[arg(short, long, value_name = "N")]
    pub max_results: Option<usize>,

    /// Run browsers with a visible window (overrides config headless setting)
    #[arg(long, conflicts_with = "headless")]
    pub headed: bool,

    /// Force headless browsers (overrides config)
    #[arg(long)]
    pub headless: bool,

    /// Path to a proxy list file, one endpoint per line; enables proxy use
    #[arg(long, value_name = "FILE")]
    pub proxy_file: Option<String>,

    /// Output directory for result files (overrides config)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<String>,

    /// Output format: 'csv' (default from config) or 'json'
    #[arg(short = 'f', long, value_name = "FORMAT")]
    pub output_format: Option<String>,

    /// Verbose logging (use -v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn validate(&self) -> Result<(), String> {
        // Query validation only applies when not using --init
        if !self.init && self.query.is_empty() && self.input_file.is_none() {
            return Err(
                "At least one query is required (use --query or --input-file)".to_string()
            );
        }

        if self.query.iter().any(|q| q.trim().is_empty()) {
            return Err("Queries cannot be empty".to_string());
        }

        if let Some(workers) = self.workers {
            if workers == 0 {
                return Err("Workers must be greater than 0".to_string());
            }
        }

        if let Some(max_results) = self.max_results {
            if max_results == 0 {
                return Err("Max results must be greater than 0".to_string());
            }
        }

        if let Some(format) = &self.output_format {
            if !["csv", "json"].contains(&format.to_lowercase().as_str()) {
                return Err("Output format must be 'csv' or 'json'".to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("placescout").chain(args.iter().copied()))
    }

    #[test]
    fn test_requires_query_or_input_file() {
        assert!(parse(&[]).validate().is_err());
        assert!(parse(&["--query", "coffee in soho"]).validate().is_ok());
        assert!(parse(&["--input-file", "queries.txt"]).validate().is_ok());
        assert!(parse(&["--init"]).validate().is_ok());
    }

    #[test]
    fn test_repeatable_query_flag() {
        let cli = parse(&["-q", "coffee", "-q", "pizza"]);
        assert_eq!(cli.query, vec!["coffee", "pizza"]);
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(parse(&["-q", "x", "--workers", "0"]).validate().is_err());
        assert!(parse(&["-q", "x", "--max-results", "0"]).validate().is_err());
    }

    #[test]
    fn test_output_format_checked() {
        assert!(parse(&["-q", "x", "-f", "json"]).validate().is_ok());
        assert!(parse(&["-q", "x", "-f", "xlsx"]).validate().is_err());
    }
}
