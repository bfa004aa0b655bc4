use anyhow::Result;
use clap::Args;

#[derive(Args)]
pub struct VersionArgs {
    /// Show detailed version information
    #[arg(short = 'd', long = "detailed")]
    pub detailed: bool,
}

pub async fn execute(args: VersionArgs) -> Result<()> {
    let git_sha = option_env!("GIT_SHA").unwrap_or("unknown");

    println!("{} {} ({git_sha})", crate::PKG_NAME, crate::VERSION);
    if args.detailed {
        println!("Rust Edition: 2024");
        println!("Repository: {}", env!("CARGO_PKG_REPOSITORY"));
        println!("License: {}", env!("CARGO_PKG_LICENSE"));
        println!("Description: {}", crate::PKG_DESCRIPTION);
    }
    Ok(())
}
