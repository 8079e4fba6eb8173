use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{error, info};

use crate::{
    client::{self, Client, Config, Registry},
    fanout::FanOut,
    filter::{Pattern, TagFilter},
    renew::{renew_repositories, renew_repository},
    runtime::{ContainerRuntime, DockerCli},
    style::Palette,
    truncate::{BatchSummary, truncate_repositories, truncate_repository},
    types::Repository,
};

/// Manage Docker Hub repositories and tags
#[derive(Debug, Parser)]
#[command(name = "hubctl", version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Repository owner (user or organization), defaults to the username
    #[arg(long, global = true, env = "DOCKERHUB_ORG")]
    pub org: Option<String>,

    /// Docker Hub username
    #[arg(long, global = true, env = "DOCKERHUB_USERNAME")]
    pub username: Option<String>,

    /// Docker Hub password or access token
    #[arg(long, global = true, env = "DOCKERHUB_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Only print what would be done
    #[arg(
        long,
        global = true,
        default_value_t = true,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        action = ArgAction::Set
    )]
    pub dry_run: bool,

    /// Docker Hub API endpoint
    #[arg(long, global = true, env = "DOCKERHUB_URL", default_value = client::DEFAULT_HUB_URL)]
    pub hub_url: String,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Delete the specified repository
    #[command(visible_alias = "del")]
    Delete(ImageArgs),
    /// Show details about a repository
    Describe(ImageArgs),
    /// List all repositories of the organization
    #[command(visible_alias = "ls")]
    List {
        /// Include pull count, average size, tag count and last update
        #[arg(short = 'x', long)]
        expand: bool,
    },
    /// List the tags of a repository
    Get(ImageArgs),
    /// Re-pull and re-push stale tags to refresh them
    Renew(RenewArgs),
    /// Delete inactive or matching tags
    Truncate(TruncateArgs),
}

#[derive(Debug, Args)]
pub struct ImageArgs {
    /// Repository (image) name
    #[arg(short, long)]
    pub image: String,
}

#[derive(Debug, Args)]
pub struct RenewArgs {
    /// Repository (image) name
    #[arg(short, long, conflicts_with = "all")]
    pub image: Option<String>,

    /// Renew tags in every repository of the organization
    #[arg(long)]
    pub all: bool,
}

#[derive(Debug, Args)]
pub struct TruncateArgs {
    /// Repository (image) name
    #[arg(short, long)]
    pub image: Option<String>,

    /// Truncate every repository whose name matches this expression
    #[arg(long = "imageRegEx")]
    pub image_regex: Option<String>,

    /// Truncate every repository of the organization
    #[arg(long)]
    pub all: bool,

    /// Delete tags not updated for 30 days, keeping the latest 25 of them
    #[arg(long)]
    pub inactive: bool,

    /// Delete tags whose name matches this expression
    #[arg(long = "tagRegEx")]
    pub tag_regex: Option<String>,
}

/// Which repositories a batch command acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Single(String),
    Matching(String),
    All,
}

impl TruncateArgs {
    /// The tag regex wins over `--inactive` when both are given.
    pub fn filter(&self) -> Result<TagFilter> {
        match (&self.tag_regex, self.inactive) {
            (Some(pattern), _) => Ok(TagFilter::pattern(pattern)),
            (None, true) => Ok(TagFilter::inactive()),
            (None, false) => bail!("You should provide RegExp for image tag or set flag '--inactive'"),
        }
    }

    pub fn selection(&self) -> Result<Selection> {
        if self.all {
            return Ok(Selection::All);
        }
        match (&self.image, &self.image_regex) {
            (Some(image), _) => Ok(Selection::Single(image.clone())),
            (None, Some(pattern)) => Ok(Selection::Matching(pattern.clone())),
            (None, None) => {
                bail!("You should provide image (fixed name or RegExp) or set flag '--all'")
            }
        }
    }
}

impl RenewArgs {
    pub fn selection(&self) -> Result<Selection> {
        match (&self.image, self.all) {
            (_, true) => Ok(Selection::All),
            (Some(image), false) => Ok(Selection::Single(image.clone())),
            (None, false) => bail!("You should provide image or set flag --all"),
        }
    }
}

impl GlobalArgs {
    pub fn config(&self) -> Result<Config> {
        let org = self
            .org
            .clone()
            .or_else(|| self.username.clone())
            .filter(|org| !org.is_empty())
            .context("No organization given, set --org, DOCKERHUB_ORG or DOCKERHUB_USERNAME")?;

        let mut config = Config::new(org).with_base_url(&self.hub_url);
        config.username = self.username.clone();
        config.password = self.password.clone();
        Ok(config)
    }

    pub fn palette(&self) -> Palette {
        if self.no_color {
            Palette::plain()
        } else {
            Palette::detect()
        }
    }
}

/// Everything a command needs to run
pub struct App {
    pub client: Arc<Client>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub fanout: FanOut,
    pub palette: Palette,
    pub dry_run: bool,
}

impl App {
    pub fn new(global: &GlobalArgs) -> Result<Self> {
        let client = Client::new(global.config()?).context("Failed to create HTTP client")?;
        Ok(App {
            client: Arc::new(client),
            runtime: Arc::new(DockerCli::default()),
            fanout: FanOut::for_host(),
            palette: global.palette(),
            dry_run: global.dry_run,
        })
    }

    fn org(&self) -> &str {
        self.client.org()
    }

    fn registry(&self) -> Arc<dyn Registry> {
        self.client.clone()
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    // Flag combinations are checked before touching the network.
    match cli.command {
        Command::Delete(args) => delete_repository(&App::new(&cli.global)?, &args.image).await,
        Command::Describe(args) => describe_repository(&App::new(&cli.global)?, &args.image).await,
        Command::List { expand } => list_repositories(&App::new(&cli.global)?, expand).await,
        Command::Get(args) => list_tags(&App::new(&cli.global)?, &args.image).await,
        Command::Renew(args) => {
            let selection = args.selection()?;
            renew(&App::new(&cli.global)?, selection).await
        }
        Command::Truncate(args) => {
            let selection = args.selection()?;
            let filter = args.filter()?;
            truncate(&App::new(&cli.global)?, selection, filter).await
        }
    }
}

async fn delete_repository(app: &App, image: &str) -> Result<()> {
    let p = app.palette;
    if app.dry_run {
        println!(
            "{} Delete docker image repository: {}/{}",
            p.yellow("[DRY-RUN]"),
            p.bold_white(app.org()),
            p.bold_white(image)
        );
        return Ok(());
    }

    println!(
        "{} {} {}",
        p.blue("===>"),
        p.bold_white("Deleting docker image repository"),
        p.bold_green(format!("{}/{image}", app.org()))
    );
    app.client
        .delete_repository(image)
        .await
        .context("Failed to delete repository")?;
    println!("{}", p.green("Done \u{2714}"));
    Ok(())
}

async fn describe_repository(app: &App, image: &str) -> Result<()> {
    let repo = app
        .client
        .describe_repository(image)
        .await
        .with_context(|| format!("Failed to describe {}/{image}", app.org()))?;

    let latest = app
        .client
        .latest_tag(image)
        .await
        .with_context(|| format!("Failed to read the latest tag of {}/{image}", app.org()))?;

    for (name, value) in describe_fields(repo, latest) {
        println!("{}", app.palette.blue(format!("{name}: {value}")));
    }
    Ok(())
}

fn describe_fields(repo: Repository, latest: Option<String>) -> Vec<(&'static str, String)> {
    vec![
        ("User", repo.user),
        ("Name", repo.name),
        ("Namespace", repo.namespace),
        ("RepositoryType", repo.repository_type.unwrap_or_default()),
        ("Status", repo.status.to_string()),
        ("Description", repo.description.unwrap_or_default()),
        ("IsPrivate", repo.is_private.to_string()),
        ("IsAutomated", repo.is_automated.to_string()),
        ("CanEdit", repo.can_edit.to_string()),
        ("StarCount", repo.star_count.to_string()),
        ("PullCount", repo.pull_count.to_string()),
        ("LastUpdated", format_time(repo.last_updated)),
        ("LatestTag", latest.unwrap_or_else(|| "-".to_string())),
        ("IsMigrated", repo.is_migrated.to_string()),
        ("CollaboratorCount", repo.collaborator_count.to_string()),
        ("Affiliation", repo.affiliation.unwrap_or_default()),
        ("HubUser", repo.hub_user),
    ]
}

struct Listing {
    name: String,
    pull_count: u64,
    tag_count: u64,
    average_size: f64,
    last_updated: String,
}

async fn list_repositories(app: &App, expand: bool) -> Result<()> {
    let repositories = app
        .client
        .list_repositories()
        .await
        .context("Failed to list repositories")?;

    let hub = app.client.clone();
    let listings = app
        .fanout
        .run(repositories, move |_, repo: Repository| {
            let hub = hub.clone();
            async move {
                let mut listing = Listing {
                    last_updated: format_time(repo.last_updated),
                    pull_count: repo.pull_count,
                    name: repo.name,
                    tag_count: 0,
                    average_size: 0.0,
                };
                if expand {
                    match hub.list_tags(&listing.name).await {
                        Ok(tags) => {
                            listing.tag_count = tags.len() as u64;
                            listing.average_size = client::average_size_mib(&tags);
                        }
                        Err(err) => {
                            error!(repository = %listing.name, error = %err, "failed to list tags")
                        }
                    }
                } else {
                    match hub.tag_count(&listing.name).await {
                        Ok(count) => listing.tag_count = count,
                        Err(err) => {
                            error!(repository = %listing.name, error = %err, "failed to count tags")
                        }
                    }
                }
                listing
            }
        })
        .await;

    let p = app.palette;
    if expand {
        println!(
            "| Image Num   | {:<44} | {:<11} | {:<12} | {:<10} | Last Updated",
            "Name", "Pulls Count", "AvgSize (MB)", "Tags Count"
        );
    } else {
        println!("| Image Num   | {:<55} | Tags Count", "Name");
    }
    for (index, listing) in listings.iter().enumerate() {
        if expand {
            let count = format!("{:<10}", listing.tag_count);
            let count = match listing.tag_count {
                0 => p.bold_red(count).to_string(),
                50.. => p.bold_yellow(count).to_string(),
                _ => p.bold_white(count).to_string(),
            };
            println!(
                "| Image {:<5} | {} | {:<11} | {:<12.2} | {} | {}",
                index + 1,
                p.bold_white(format!("{:<44}", listing.name)),
                listing.pull_count,
                listing.average_size,
                count,
                listing.last_updated
            );
        } else {
            println!(
                "| Image {:<5} | {:<55} | {}",
                index + 1,
                listing.name,
                listing.tag_count
            );
        }
    }
    Ok(())
}

async fn list_tags(app: &App, image: &str) -> Result<()> {
    let tags = app
        .client
        .list_tags(image)
        .await
        .with_context(|| format!("Failed to list tags of {}/{image}", app.org()))?;
    for (index, tag) in tags.iter().enumerate() {
        println!(
            "| Tag {:<3} | {} | {}",
            index + 1,
            app.palette.bold_white(format!("{:<30}", tag.name)),
            format_time(tag.last_updated)
        );
    }
    Ok(())
}

/// Resolves a selection to repository names, listing the organization when
/// needed.
async fn select_images(app: &App, selection: Selection) -> Result<Vec<String>> {
    let pattern = match selection {
        Selection::Single(image) => return Ok(vec![image]),
        Selection::Matching(pattern) => Some(Pattern::new(&pattern)),
        Selection::All => None,
    };
    let repositories = app
        .client
        .list_repositories()
        .await
        .context("Failed to list repositories")?;

    Ok(repositories
        .into_iter()
        .map(|repo| repo.name)
        .filter(|name| pattern.as_ref().is_none_or(|pattern| pattern.is_match(name)))
        .collect())
}

async fn truncate(app: &App, selection: Selection, filter: TagFilter) -> Result<()> {
    let p = app.palette;
    if let Selection::Single(image) = &selection {
        println!(
            "{} {} {}",
            p.blue("===>"),
            p.bold_white("Processing docker image repository"),
            p.bold_green(format!("{}/{image}", app.org()))
        );
        let report = truncate_repository(
            app.client.as_ref(),
            image,
            &filter,
            app.dry_run,
            Utc::now(),
            p,
        )
        .await
        .context("Failed to truncate tags")?;
        if !report.failed.is_empty() {
            bail!("Failed to delete {} of {} tags", report.failed.len(), report.selected.len());
        }
        println!("{}", p.bold_green("Done \u{2714}"));
        return Ok(());
    }

    let images = select_images(app, selection).await?;
    info!(repositories = images.len(), workers = app.fanout.workers(), "truncating tags");
    let summary = truncate_repositories(
        app.registry(),
        images,
        filter,
        app.dry_run,
        app.fanout,
        p,
    )
    .await;
    finish(app, &summary)
}

async fn renew(app: &App, selection: Selection) -> Result<()> {
    let p = app.palette;
    if let Selection::Single(image) = &selection {
        println!(
            "{} {} {}",
            p.blue("===>"),
            p.bold_white("Processing docker image repository"),
            p.bold_green(format!("{}/{image}", app.org()))
        );
        let report = renew_repository(
            app.client.as_ref(),
            app.runtime.as_ref(),
            app.org(),
            image,
            app.dry_run,
            Utc::now(),
            p,
        )
        .await
        .context("Failed to renew tags")?;
        if !report.failed.is_empty() {
            bail!("Failed to renew {} tags", report.failed.len());
        }
        println!("{}", p.bold_green("Done \u{2714}"));
        return Ok(());
    }

    let images = select_images(app, selection).await?;
    info!(repositories = images.len(), workers = app.fanout.workers(), "renewing tags");
    let summary = renew_repositories(
        app.registry(),
        app.runtime.clone(),
        app.org().to_string(),
        images,
        app.dry_run,
        app.fanout,
        p,
    )
    .await;
    finish(app, &summary)
}

fn finish(app: &App, summary: &BatchSummary) -> Result<()> {
    let p = app.palette;
    println!(
        "{} {} repositories processed, {} failed",
        p.bold_green("Done \u{2714}"),
        summary.processed.len(),
        summary.failed.len()
    );
    if !summary.is_success() {
        bail!("Failed repositories: {}", summary.failed.join(", "));
    }
    Ok(())
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|time| time.to_rfc3339()).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_dry_run_defaults_to_true() {
        let cli = parse(&["hubctl", "--org", "acme", "list"]);
        assert!(cli.global.dry_run);

        let cli = parse(&["hubctl", "list", "--dry-run"]);
        assert!(cli.global.dry_run);

        let cli = parse(&["hubctl", "--dry-run=false", "get", "-i", "api"]);
        assert!(!cli.global.dry_run);
        assert!(matches!(cli.command, Command::Get(ImageArgs { image }) if image == "api"));
    }

    #[test]
    fn test_describe_shows_latest_tag() {
        let repo = Repository {
            name: "api".to_string(),
            pull_count: 3,
            ..Repository::default()
        };
        let fields = describe_fields(repo.clone(), Some("v1.0.0".to_string()));
        assert!(fields.contains(&("LatestTag", "v1.0.0".to_string())));
        assert!(fields.contains(&("PullCount", "3".to_string())));

        let fields = describe_fields(repo, None);
        assert!(fields.contains(&("LatestTag", "-".to_string())));
    }

    #[test]
    fn test_aliases() {
        assert!(matches!(parse(&["hubctl", "ls", "-x"]).command, Command::List { expand: true }));
        assert!(matches!(parse(&["hubctl", "del", "-i", "api"]).command, Command::Delete(_)));
    }

    #[test]
    fn test_image_is_required() {
        assert!(Cli::try_parse_from(["hubctl", "describe"]).is_err());
    }

    #[test]
    fn test_truncate_flags() {
        let Command::Truncate(args) =
            parse(&["hubctl", "truncate", "--imageRegEx", "^api-", "--tagRegEx", "dev"]).command
        else {
            panic!("expected truncate");
        };
        assert_eq!(args.selection().unwrap(), Selection::Matching("^api-".to_string()));
        assert!(matches!(args.filter().unwrap(), TagFilter::Pattern(_)));

        let Command::Truncate(args) = parse(&["hubctl", "truncate", "--all", "--inactive"]).command
        else {
            panic!("expected truncate");
        };
        assert_eq!(args.selection().unwrap(), Selection::All);
        assert!(matches!(args.filter().unwrap(), TagFilter::Age { keep: 25, .. }));
    }

    #[test]
    fn test_truncate_validation() {
        let Command::Truncate(args) = parse(&["hubctl", "truncate", "--all"]).command else {
            panic!("expected truncate");
        };
        assert_eq!(
            args.filter().unwrap_err().to_string(),
            "You should provide RegExp for image tag or set flag '--inactive'"
        );

        let Command::Truncate(args) = parse(&["hubctl", "truncate", "--inactive"]).command else {
            panic!("expected truncate");
        };
        assert_eq!(
            args.selection().unwrap_err().to_string(),
            "You should provide image (fixed name or RegExp) or set flag '--all'"
        );
    }

    #[test]
    fn test_renew_validation() {
        let Command::Renew(args) = parse(&["hubctl", "renew"]).command else {
            panic!("expected renew");
        };
        assert!(args.selection().is_err());

        let Command::Renew(args) = parse(&["hubctl", "renew", "-i", "api"]).command else {
            panic!("expected renew");
        };
        assert_eq!(args.selection().unwrap(), Selection::Single("api".to_string()));

        assert!(Cli::try_parse_from(["hubctl", "renew", "-i", "api", "--all"]).is_err());
    }

    #[test]
    fn test_config_falls_back_to_username() {
        let cli = parse(&[
            "hubctl",
            "--username",
            "jdoe",
            "--password",
            "secret",
            "--hub-url",
            "http://127.0.0.1:1/v2",
            "list",
        ]);
        let config = cli.global.config().unwrap();
        assert_eq!(config.org, "jdoe");
        assert_eq!(config.base_url, "http://127.0.0.1:1/v2");
        assert_eq!(config.password.as_deref(), Some("secret"));
    }
}
