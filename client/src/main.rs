use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use noteshare::{
    analytics::{self, TimeScale},
    api::{auth, notes, users},
    heartbeat,
    models::Note,
    search::{self, SearchField, SearchResults},
    ClientConfig, Error, Gateway,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter};
use tracing_tree::HierarchicalLayer;

/// Command line client for noteshare
#[derive(Parser, Debug)]
#[clap(name = "noteshare", version)]
struct Cli {
    /// Backend base URL (overrides NOTESHARE_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the session
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "NOTESHARE_PASSWORD", hide_env_values = true)]
        password: String,
        /// Keep the session across runs; otherwise it ends with this process
        #[arg(long)]
        remember: bool,
    },
    /// Forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    #[command(subcommand)]
    Notes(NotesCommand),
    /// Note counts by category and over time
    Stats {
        /// Someone else's profile, by username or display name
        #[arg(long)]
        user: Option<String>,
        /// day, week, month or year
        #[arg(long, default_value = "month")]
        scale: String,
    },
    /// Report presence to the backend
    Heartbeat {
        /// Send a single heartbeat and exit
        #[arg(long)]
        once: bool,
        /// Seconds between heartbeats (overrides NOTESHARE_HEARTBEAT_SECS)
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum NotesCommand {
    /// The shared feed, newest first
    List {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        query: Option<String>,
    },
    /// Notes you own
    Mine,
    Show {
        slug: String,
    },
    Search {
        query: String,
        /// title, category, user or all
        #[arg(long, default_value = "all")]
        field: String,
    },
    /// Rate a note from 1 to 5
    Rate {
        slug: String,
        value: Option<u8>,
        /// Remove your rating instead
        #[arg(long)]
        clear: bool,
    },
    Bookmark {
        slug: String,
        #[arg(long)]
        remove: bool,
    },
}

fn setup_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            HierarchicalLayer::default()
                .with_writer(std::io::stderr)
                .with_indent_lines(true)
                .with_indent_amount(2)
                .with_targets(true),
        )
        .try_init()?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    setup_tracing()?;

    let cli = Cli::parse();

    let mut config = ClientConfig::from_env()?;
    if let Some(api_url) = &cli.api_url {
        let mut overridden = ClientConfig::new(api_url)?
            .with_state_dir(config.state_dir())
            .with_heartbeat_interval(config.heartbeat_interval());
        if let Some(timeout) = config.timeout() {
            overridden = overridden.with_timeout(timeout);
        }
        config = overridden;
    }

    let gateway = noteshare::open(config)?;
    run(&gateway, cli.command).await
}

async fn run(gateway: &Gateway, command: Command) -> Result<()> {
    match command {
        Command::Login {
            email,
            password,
            remember,
        } => {
            let login = auth::login(gateway, &email, &password, remember).await?;
            println!(
                "Signed in as {}",
                login.name.as_deref().unwrap_or(email.as_str())
            );
            if !remember {
                println!("Session is not remembered; pass --remember to keep it between runs.");
            }
        }
        Command::Logout => {
            auth::logout(gateway)?;
            println!("Signed out");
        }
        Command::Whoami => {
            require_session(gateway)?;
            let profile = users::own_profile(gateway).await?;
            println!("{} <{}>", profile.name, profile.email);
            if profile.is_admin {
                println!("admin");
            }
            println!("{} notes", profile.notes_count);
        }
        Command::Notes(command) => run_notes(gateway, command).await?,
        Command::Stats { user, scale } => {
            let scale: TimeScale = scale.parse()?;
            let profile = match user {
                Some(user) => users::public_profile(gateway, &user).await?,
                None => {
                    require_session(gateway)?;
                    users::own_profile(gateway).await?
                }
            };

            let today = chrono::Utc::now().date_naive();
            let stats = analytics::profile_stats(&profile.notes, scale, today);
            println!("{} notes", stats.total);
            for category in &stats.categories {
                println!("  {:<20} {}", category.label, category.count);
            }
            println!();
            for point in &stats.timeline {
                println!("  {:<8} {}", point.label, point.count);
            }
        }
        Command::Heartbeat { once, interval } => {
            require_session(gateway)?;
            if once {
                if !heartbeat::beat(gateway).await {
                    return Err(eyre!("Heartbeat was not acknowledged"));
                }
                println!("ok");
                return Ok(());
            }

            let period = interval
                .map(Duration::from_secs)
                .unwrap_or_else(|| gateway.config().heartbeat_interval());
            info!("Sending heartbeats every {:?}", period);
            let handle = heartbeat::spawn(gateway.clone(), period);

            tokio::signal::ctrl_c().await?;
            handle.abort();
        }
    }

    Ok(())
}

async fn run_notes(gateway: &Gateway, command: NotesCommand) -> Result<()> {
    match command {
        NotesCommand::List { category, query } => {
            let feed = notes::feed(gateway).await?;
            let view = search::feed_view(
                &feed,
                category.as_deref().unwrap_or_default(),
                query.as_deref().unwrap_or_default(),
            );
            print_notes(&view);
        }
        NotesCommand::Mine => {
            require_session(gateway)?;
            let mut mine = notes::mine(gateway).await?;
            search::sort_newest_first(&mut mine);
            print_notes(&mine);
        }
        NotesCommand::Show { slug } => {
            let note = notes::detail(gateway, &slug).await?;
            print_note(&note);
            println!();
            println!("{}", note.body);
            for attachment in &note.attachments {
                println!("  [{}] {}", attachment.id, attachment.file_name());
            }
        }
        NotesCommand::Search { query, field } => {
            let field: SearchField = field.parse()?;
            // Local fallback searches the feed
            let feed = notes::feed(gateway).await.unwrap_or_default();
            match search::search_with_fallback(gateway, &query, field, &feed).await {
                SearchResults::Remote(hits) => {
                    for hit in hits {
                        println!("{:>5}  {}  {}", hit.id, hit.title, hit.body_snippet);
                    }
                }
                SearchResults::Local(found) => print_notes(&found),
            }
        }
        NotesCommand::Rate { slug, value, clear } => {
            require_session(gateway)?;
            if clear {
                notes::unrate(gateway, &slug).await?;
                println!("Rating removed");
            } else {
                let value = value.ok_or_else(|| eyre!("Give a rating from 1 to 5, or --clear"))?;
                let note = notes::rate(gateway, &slug, value).await?;
                print_note(&note);
            }
        }
        NotesCommand::Bookmark { slug, remove } => {
            require_session(gateway)?;
            if remove {
                notes::unbookmark(gateway, &slug).await?;
                println!("Bookmark removed");
            } else {
                let note = notes::bookmark(gateway, &slug).await?;
                print_note(&note);
            }
        }
    }

    Ok(())
}

fn require_session(gateway: &Gateway) -> Result<()> {
    match gateway.credentials().require_session() {
        Ok(_) => Ok(()),
        Err(Error::NotAuthenticated) => Err(eyre!(
            "You are not authenticated. Run `noteshare login` first."
        )),
        Err(err) => Err(err.into()),
    }
}

fn print_note(note: &Note) {
    let rating = note
        .avg_rating
        .map(|avg| format!("{avg:.1} ({})", note.ratings_count))
        .unwrap_or_else(|| "unrated".to_string());
    let bookmark = if note.is_bookmarked { " *" } else { "" };

    println!(
        "{}  [{}]  {} by {}  {}{}",
        note.slug,
        note.category,
        note.title,
        note.author().unwrap_or("unknown"),
        rating,
        bookmark
    );
}

fn print_notes(notes: &[Note]) {
    if notes.is_empty() {
        println!("No notes found");
    }
    for note in notes {
        print_note(note);
    }
}
