use std::path::PathBuf;
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args
{
    /// Preferences file, re-read before every phase
    #[arg(long, short, default_value = "prefs.yaml")]
    pub config: PathBuf,

    /// Wait for enter on stdin before every phase
    #[arg(long, default_value_t = false)]
    pub debug: bool,

    /// Pass commands typed on stdin straight to the supply and print its replies
    #[arg(long, default_value_t = false, conflicts_with = "simulate")]
    pub shell: bool,

    /// Run against a simulated cell instead of the networked supply
    #[arg(long, default_value_t = false)]
    pub simulate: bool,
}

#[cfg(test)]
mod tests
{
    use super::Args;
    use clap::Parser;

    #[test]
    fn defaults()
    {
        let args = Args::parse_from(["arcs-er"]);
        assert_eq!(args.config.to_str(), Some("prefs.yaml"));
        assert!(!args.debug && !args.shell && !args.simulate);
    }

    #[test]
    fn shell_and_simulate_conflict()
    {
        assert!(Args::try_parse_from(["arcs-er", "--shell", "--simulate"]).is_err());
        assert!(Args::try_parse_from(["arcs-er", "--debug", "-c", "run.yaml"]).is_ok());
    }
}
