use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use clap::Parser;
use miette::{Context, IntoDiagnostic};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

use unearth::{
    FindLinks, FormatControl, NameSet, PackageFinder, Requirement, Session, SessionOptions,
};

#[derive(Parser)]
#[command(author, version, about = "Find and fetch Python package distributions", long_about = None)]
struct Args {
    /// The requirement to search for, e.g. 'flask>=2' or
    /// 'django @ git+https://github.com/django/django.git@main'.
    requirement: String,

    /// Base URL of a package index compliant with the simple repository API.
    /// May be given multiple times; defaults to PyPI when no source is given.
    #[clap(long = "index-url", value_name = "URL")]
    index_urls: Vec<Url>,

    /// A find-links page URL, a local directory of artifacts, or a local
    /// HTML file. May be given multiple times.
    #[clap(long = "find-links", value_name = "LOC")]
    find_links: Vec<String>,

    /// Never select a wheel for this package (':all:' for every package).
    #[clap(long = "no-binary", value_name = "NAME")]
    no_binary: Vec<String>,

    /// Never select an sdist for this package (':all:' for every package).
    #[clap(long = "only-binary", value_name = "NAME")]
    only_binary: Vec<String>,

    /// Prefer wheels over sdists even when a newer sdist exists.
    #[clap(long)]
    prefer_binary: bool,

    /// Allow pre-release and development versions.
    #[clap(long = "pre")]
    pre: bool,

    /// Skip TLS certificate verification for this host.
    #[clap(long = "trusted-host", value_name = "HOST")]
    trusted_hosts: Vec<String>,

    /// Show debug output.
    #[clap(short, long)]
    verbose: bool,

    /// Download the best match into this directory, unpacking archives and
    /// checking out repositories.
    #[clap(long, value_name = "DIR")]
    download: Option<PathBuf>,
}

/// Exit code for "the search ran but nothing matched".
const NO_MATCH: u8 = 1;
/// Exit code for an invalid requirement or an I/O failure.
const FAILURE: u8 = 2;

async fn run(args: Args) -> miette::Result<ExitCode> {
    let requirement = match Requirement::from_str(&args.requirement) {
        Ok(requirement) => requirement,
        Err(error) => {
            eprintln!("{:?}", miette::Report::new(error));
            return Ok(ExitCode::from(FAILURE));
        }
    };

    let session = Session::with_options(SessionOptions {
        trusted_hosts: args.trusted_hosts.clone(),
        ..SessionOptions::default()
    })
    .into_diagnostic()?;

    let mut format_control = FormatControl::default();
    for name in &args.no_binary {
        format_control.no_binary.add(name).into_diagnostic()?;
    }
    for name in &args.only_binary {
        format_control.only_binary.add(name).into_diagnostic()?;
    }
    let mut prefer_binary = NameSet::default();
    if args.prefer_binary {
        prefer_binary.add(":all:").into_diagnostic()?;
    }

    let mut finder = PackageFinder::new(session)
        .with_format_control(format_control)
        .with_prefer_binary(prefer_binary)
        .with_allow_prereleases(args.pre.then_some(true));

    for url in &args.index_urls {
        finder.add_index_url(url.clone());
    }
    for location in &args.find_links {
        let find_links = FindLinks::from_str(location)
            .into_diagnostic()
            .wrap_err_with(|| format!("invalid find-links location '{location}'"))?;
        finder.add_find_links(find_links);
    }
    if args.index_urls.is_empty() && args.find_links.is_empty() {
        finder.add_index_url(Url::parse("https://pypi.org/simple/").expect("PyPI URL is valid"));
    }

    let result = match finder.find_best_match(&requirement, None).await {
        Ok(result) => result,
        Err(error) => {
            eprintln!("{:?}", miette::Report::new(error));
            return Ok(ExitCode::from(FAILURE));
        }
    };

    let Some(best) = &result.best else {
        if let Some(reason) = result.failure_reason() {
            tracing::error!("{reason}");
        }
        return Ok(ExitCode::from(NO_MATCH));
    };

    let mut output = serde_json::json!({
        "name": best.name.as_str(),
        "version": best.version.as_ref().map(ToString::to_string),
        "link": {
            "url": best.link.url.as_str(),
            "comes_from": best.link.comes_from.as_ref().map(Url::as_str),
            "yank_reason": best.link.yanked.reason,
            "requires_python": best.link.requires_python,
            "metadata": best.link.metadata_url().map(|url| url.to_string()),
        },
    });

    if let Some(directory) = &args.download {
        let unpacked = match unearth::download_and_unpack(
            finder.session(),
            &best.link,
            directory,
            Some(directory),
            None,
        )
        .await
        {
            Ok(unpacked) => unpacked,
            Err(error) => {
                eprintln!("{:?}", miette::Report::new(error));
                return Ok(ExitCode::from(FAILURE));
            }
        };
        output["path"] = serde_json::json!(unpacked.path);
        if let Some(revision) = unpacked.revision {
            output["revision"] = serde_json::json!(revision);
        }
    }

    println!("{}", serde_json::to_string_pretty(&output).into_diagnostic()?);
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_env_filter(args.verbose)),
        )
        .init();

    match run(args).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{error:?}");
            ExitCode::from(FAILURE)
        }
    }
}

/// The [`EnvFilter`] used when the user did not set RUST_LOG.
fn default_env_filter(verbose: bool) -> EnvFilter {
    let directive = if verbose {
        "unearth=debug"
    } else {
        "unearth=info"
    };
    EnvFilter::new("warn").add_directive(Directive::from_str(directive).expect("valid directive"))
}
