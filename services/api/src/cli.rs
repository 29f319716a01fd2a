use crate::demo::{list_programs, run_demo, DemoArgs, ProgramsArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use loan_portal::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Loan Portal",
    about = "Run the loan application portal or walk through it from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// List the loan programs in the active catalog
    Programs(ProgramsArgs),
    /// Walk a broker-originated application from draft to underwriting
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Programs(args) => list_programs(args),
        Command::Demo(args) => run_demo(args).await,
    }
}
