//! Resource commands: `file`, `prop`, `url`.

use crate::args::Session;

#[derive(clap::Args)]
pub struct FileArgs {
    /// Resource path, relative to the source's repository subfolder
    resource: String,
}

#[derive(clap::Args)]
pub struct PropArgs {
    /// Property file, without the `.properties` extension
    prop_file: String,
    /// Key to look up
    key: String,
}

#[derive(clap::Args)]
pub struct UrlArgs {
    /// Immutable URL to fetch
    url: String,
    /// Force the cached file name to end with this suffix
    #[arg(long)]
    suffix: Option<String>,
}

pub fn run_file(args: FileArgs, session: &Session) -> anyhow::Result<()> {
    let path = session.service_with_source()?.file(&args.resource)?;
    println!("{}", path.display());
    Ok(())
}

pub fn run_prop(args: PropArgs, session: &Session) -> anyhow::Result<()> {
    let value = session
        .service_with_source()?
        .prop(&args.prop_file, &args.key)?;
    println!("{value}");
    Ok(())
}

pub fn run_url(args: UrlArgs, session: &Session) -> anyhow::Result<()> {
    let path = session
        .service_with_optional_source()?
        .immutable_url_with_suffix(&args.url, args.suffix.as_deref())?;
    println!("{}", path.display());
    Ok(())
}
