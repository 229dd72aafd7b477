// Copyright 2023 Remi Bernotavicius

use clap::Parser;
use clap::Subcommand;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod catalog;
mod database;
mod error;
mod recipes;
mod relations;
mod shopping_list;
mod users;

use error::{Error, Result};
use users::Requester;

/// Recipe sharing: a catalog of ingredients and tags, recipes, favorites, shopping carts and
/// author subscriptions.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path of the SQLite database. Defaults to `data.sqlite` in the user data directory.
    #[arg(long, global = true, env = "FOODGRAM_DATABASE")]
    database: Option<PathBuf>,

    /// Username to act as. Without it requests are anonymous.
    #[arg(long, global = true, env = "FOODGRAM_USER")]
    user: Option<String>,

    /// More logging, repeat for even more.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        password: String,
    },
    ListUsers,
    ShowUser {
        username: String,
    },
    DeleteUser {
        username: String,
    },
    ChangePassword {
        #[arg(long)]
        current: String,
        #[arg(long)]
        new: String,
    },

    AddIngredient {
        name: String,
        measurement_unit: String,
    },
    ShowIngredient {
        id: i32,
    },
    DeleteIngredient {
        id: i32,
    },
    SearchIngredients {
        #[arg(default_value = "")]
        query: String,
    },

    AddTag {
        name: String,
        slug: String,
        color: String,
    },
    ListTags,
    ShowTag {
        id: i32,
    },
    DeleteTag {
        id: i32,
    },

    /// Creates a recipe from a JSON payload file.
    CreateRecipe {
        path: PathBuf,
    },
    /// Updates a recipe from a JSON payload file. Tags and ingredients are replaced.
    UpdateRecipe {
        id: i32,
        path: PathBuf,
    },
    DeleteRecipe {
        id: i32,
    },
    ShowRecipe {
        id: i32,
    },
    ListRecipes {
        /// Only recipes by this username.
        #[arg(long)]
        author: Option<String>,
        /// Tag slug; repeat to match any of several.
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        favorited: bool,
        #[arg(long)]
        in_cart: bool,
    },
    AdminRecipes {
        #[arg(default_value = "")]
        query: String,
    },

    Favorite {
        id: i32,
    },
    Unfavorite {
        id: i32,
    },
    AddToCart {
        id: i32,
    },
    RemoveFromCart {
        id: i32,
    },
    Subscribe {
        username: String,
        #[arg(long)]
        recipes_limit: Option<usize>,
    },
    Unsubscribe {
        username: String,
    },
    Subscriptions {
        #[arg(long)]
        recipes_limit: Option<usize>,
    },
    /// Writes the aggregated shopping list to the `shopping-lists` data folder.
    DownloadShoppingCart {
        /// Open the written file with the default application.
        #[arg(long)]
        open: bool,
    },
}

/// This is where the database and other user-data lives on-disk. On Linux it should be like:
/// `~/.local/share/foodgram/`
fn data_path() -> Result<PathBuf> {
    let dirs = directories::BaseDirs::new()
        .ok_or_else(|| Error::Internal("failed to get user home directory".into()))?;
    let path = dirs.data_dir().join("foodgram");
    std::fs::create_dir_all(&path)?;
    Ok(path)
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    if let Err(e) = simple_logger::SimpleLogger::new()
        .with_level(level)
        .env()
        .init()
    {
        eprintln!("failed to initialise logging: {e}");
    }
}

fn print(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
}

fn requester(conn: &mut database::Connection, user: Option<&str>) -> Result<Requester> {
    Ok(match user {
        Some(name) => Requester::User(users::find_by_username(conn, name)?.id),
        None => Requester::Anonymous,
    })
}

fn run(args: Args) -> Result<()> {
    let path = match args.database {
        Some(path) => path,
        None => data_path()?.join("data.sqlite"),
    };
    let mut conn = database::establish_connection(path)?;
    let conn = &mut conn;
    let me = requester(conn, args.user.as_deref())?;

    match args.commands {
        Commands::CreateUser {
            email,
            username,
            first_name,
            last_name,
            password,
        } => {
            let user = users::create_user(
                conn,
                users::UserRegistration {
                    email: &email,
                    username: &username,
                    first_name: &first_name,
                    last_name: &last_name,
                    password: &password,
                },
            )?;
            print(&users::UserView::new(user, false))?
        }
        Commands::ListUsers => {
            let views = users::list_users(conn)?
                .into_iter()
                .map(|u| users::user_view(conn, me, u))
                .collect::<Result<Vec<_>>>()?;
            print(&views)?
        }
        Commands::ShowUser { username } => {
            let user = users::find_by_username(conn, &username)?;
            print(&users::user_view(conn, me, user)?)?
        }
        Commands::DeleteUser { username } => {
            let user = users::find_by_username(conn, &username)?;
            users::delete_user(conn, user.id)?
        }
        Commands::ChangePassword { current, new } => {
            users::set_password(conn, me, &current, &new)?
        }

        Commands::AddIngredient {
            name,
            measurement_unit,
        } => print(&catalog::ingredients::create_ingredient(
            conn,
            &name,
            &measurement_unit,
        )?)?,
        Commands::ShowIngredient { id } => {
            print(&catalog::ingredients::get_ingredient(conn, id.into())?)?
        }
        Commands::DeleteIngredient { id } => {
            catalog::ingredients::delete_ingredient(conn, id.into())?
        }
        Commands::SearchIngredients { query } => {
            print(&catalog::ingredients::search_ingredients(conn, &query)?)?
        }

        Commands::AddTag { name, slug, color } => {
            let tag = catalog::tags::create_tag(conn, &name, &slug, &color)?;
            print(&catalog::tags::TagView::from(tag))?
        }
        Commands::ListTags => {
            let views: Vec<_> = catalog::tags::list_tags(conn)?
                .into_iter()
                .map(catalog::tags::TagView::from)
                .collect();
            print(&views)?
        }
        Commands::ShowTag { id } => {
            let tag = catalog::tags::get_tag(conn, id.into())?;
            print(&catalog::tags::TagView::from(tag))?
        }
        Commands::DeleteTag { id } => catalog::tags::delete_tag(conn, id.into())?,

        Commands::CreateRecipe { path } => {
            let payload: recipes::RecipePayload = read_json(&path)?;
            print(&recipes::create_recipe(conn, me, &payload)?)?
        }
        Commands::UpdateRecipe { id, path } => {
            let update: recipes::RecipeUpdate = read_json(&path)?;
            print(&recipes::update_recipe(conn, me, id.into(), &update)?)?
        }
        Commands::DeleteRecipe { id } => recipes::delete_recipe(conn, me, id.into())?,
        Commands::ShowRecipe { id } => print(&recipes::get_recipe(conn, me, id.into())?)?,
        Commands::ListRecipes {
            author,
            tags,
            favorited,
            in_cart,
        } => {
            let author = author
                .map(|name| users::find_by_username(conn, &name).map(|u| u.id))
                .transpose()?;
            let filter = recipes::RecipeFilter {
                author,
                tags,
                is_favorited: favorited,
                is_in_shopping_cart: in_cart,
            };
            print(&recipes::list_recipes(conn, me, &filter)?)?
        }
        Commands::AdminRecipes { query } => print(&recipes::admin_recipes(conn, &query)?)?,

        Commands::Favorite { id } => print(&relations::add_favorite(conn, me, id.into())?)?,
        Commands::Unfavorite { id } => relations::remove_favorite(conn, me, id.into())?,
        Commands::AddToCart { id } => print(&relations::add_to_cart(conn, me, id.into())?)?,
        Commands::RemoveFromCart { id } => relations::remove_from_cart(conn, me, id.into())?,
        Commands::Subscribe {
            username,
            recipes_limit,
        } => {
            let author = users::find_by_username(conn, &username)?;
            print(&relations::subscribe(conn, me, author.id, recipes_limit)?)?
        }
        Commands::Unsubscribe { username } => {
            let author = users::find_by_username(conn, &username)?;
            relations::unsubscribe(conn, me, author.id)?
        }
        Commands::Subscriptions { recipes_limit } => {
            print(&relations::subscriptions(conn, me, recipes_limit)?)?
        }
        Commands::DownloadShoppingCart { open } => {
            let today = chrono::Local::now().date_naive();
            let file = shopping_list::download(conn, me, today)?;
            let path = file.save_to(&data_path()?.join("shopping-lists"))?;
            if open {
                open::that(&path)?;
            }
            print(&file)?
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.status_code() >= 500 {
                log::error!("{e}");
            }
            eprintln!("{} {}", e.status_code(), e.to_json());
            ExitCode::FAILURE
        }
    }
}
