// Copyright 2023 Remi Bernotavicius

use crate::database;
use crate::database::models::{Ingredient, RecipeIngredient, UserId};
use crate::database::schema::{ingredients, recipe_ingredients, shopping_cart};
use crate::error::Result;
use crate::users::{self, Requester};
use diesel::ExpressionMethods as _;
use diesel::JoinOnDsl as _;
use diesel::QueryDsl as _;
use diesel::RunQueryDsl as _;
use diesel::SelectableHelper as _;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

const HEADER: &str = "===Foodgram shopping list===";
const FOOTER: &str = "===Made by Foodgram===";

/// RFC 5987 `attr-char`s that need no escaping in a `filename*` parameter.
const FILENAME_ATTR_CHARS: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_');

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ShoppingListItem {
    pub name: String,
    pub measurement_unit: String,
    pub amount: u64,
}

impl fmt::Display for ShoppingListItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) - {}", self.name, self.measurement_unit, self.amount)
    }
}

/// Ordered by ingredient name, then unit.
#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct ShoppingList {
    pub items: Vec<ShoppingListItem>,
}

impl ShoppingList {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Sums the amounts of every row that shares an ingredient name and unit.
pub fn aggregate(rows: impl IntoIterator<Item = (RecipeIngredient, Ingredient)>) -> ShoppingList {
    let mut totals: BTreeMap<(String, String), u64> = BTreeMap::new();
    for (usage, ingredient) in rows {
        *totals
            .entry((ingredient.name, ingredient.measurement_unit))
            .or_default() += u64::try_from(usage.amount).unwrap_or(0);
    }
    ShoppingList {
        items: totals
            .into_iter()
            .map(|((name, measurement_unit), amount)| ShoppingListItem {
                name,
                measurement_unit,
                amount,
            })
            .collect(),
    }
}

/// Every ingredient row of every recipe in the user's cart, aggregated.
pub fn load_shopping_list(conn: &mut database::Connection, user: UserId) -> Result<ShoppingList> {
    let rows: Vec<(RecipeIngredient, Ingredient)> = recipe_ingredients::table
        .inner_join(ingredients::table)
        .inner_join(
            shopping_cart::table.on(shopping_cart::recipe_id.eq(recipe_ingredients::recipe_id)),
        )
        .filter(shopping_cart::user_id.eq(user))
        .select((RecipeIngredient::as_select(), Ingredient::as_select()))
        .load(conn)?;
    log::debug!("user {user} has {} ingredient rows in the cart", rows.len());
    Ok(aggregate(rows))
}

pub fn render(list: &ShoppingList) -> String {
    let mut text = String::new();
    text += HEADER;
    text += "\n";
    if list.is_empty() {
        return text;
    }
    text += "\n";
    for item in &list.items {
        text += &format!("{item}\n");
    }
    text += "\n";
    text += FOOTER;
    text += "\n";
    text
}

/// A rendered shopping list, ready to be served as an attachment.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ShoppingListDownload {
    pub filename: String,
    pub content_type: String,
    pub content_disposition: String,
    pub body: String,
}

impl ShoppingListDownload {
    /// Writes the body into `dir` under its own filename, creating `dir` if needed.
    pub fn save_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(&self.filename);
        std::fs::write(&path, &self.body)?;
        log::info!("wrote shopping list to {}", path.display());
        Ok(path)
    }
}

/// An ASCII-only `filename` for old clients, and the exact name percent-encoded as UTF-8 in
/// `filename*`. Header values must stay ASCII even when usernames are not.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "-._".contains(c) {
                c
            } else {
                '_'
            }
        })
        .collect();
    let encoded = utf8_percent_encode(filename, FILENAME_ATTR_CHARS);
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}

pub fn download(
    conn: &mut database::Connection,
    requester: Requester,
    date: chrono::NaiveDate,
) -> Result<ShoppingListDownload> {
    let user = users::get_user(conn, requester.require()?)?;
    let list = load_shopping_list(conn, user.id)?;

    let filename = format!("shopping-list-{}-{}.txt", user.username, date.format("%Y-%m-%d"));
    Ok(ShoppingListDownload {
        content_type: "text/plain; charset=utf-8".into(),
        content_disposition: content_disposition(&filename),
        filename,
        body: render(&list),
    })
}

#[cfg(test)]
fn row(name: &str, unit: &str, amount: i32) -> (RecipeIngredient, Ingredient) {
    use crate::database::models::{IngredientId, RecipeId, RecipeIngredientId};

    (
        RecipeIngredient {
            id: RecipeIngredientId::from(1),
            recipe_id: RecipeId::from(1),
            ingredient_id: IngredientId::from(1),
            amount,
        },
        Ingredient {
            id: IngredientId::from(1),
            name: name.into(),
            measurement_unit: unit.into(),
        },
    )
}

#[test]
fn item_display() {
    let item = ShoppingListItem {
        name: "Salt".into(),
        measurement_unit: "g".into(),
        amount: 8,
    };
    assert_eq!(item.to_string(), "Salt (g) - 8");
}

#[test]
fn aggregate_sums_by_name_and_unit() {
    use maplit::btreemap;

    let list = aggregate(vec![
        row("Salt", "g", 5),
        row("Eggs", "pcs", 2),
        row("Salt", "g", 3),
        row("Salt", "pinch", 1),
        row("Eggs", "pcs", 32000),
    ]);

    let totals: BTreeMap<_, _> = list
        .items
        .iter()
        .map(|i| ((i.name.as_str(), i.measurement_unit.as_str()), i.amount))
        .collect();
    assert_eq!(
        totals,
        btreemap! {
            ("Eggs", "pcs") => 32002,
            ("Salt", "g") => 8,
            ("Salt", "pinch") => 1,
        }
    );

    let names: Vec<_> = list.items.iter().map(|i| i.to_string()).collect();
    assert_eq!(names, ["Eggs (pcs) - 32002", "Salt (g) - 8", "Salt (pinch) - 1"]);
}

#[test]
fn render_empty_and_full() {
    assert_eq!(render(&ShoppingList::default()), format!("{HEADER}\n"));

    let list = aggregate(vec![row("Salt", "g", 5), row("Salt", "g", 3)]);
    assert_eq!(render(&list), format!("{HEADER}\n\nSalt (g) - 8\n\n{FOOTER}\n"));
}

#[cfg(test)]
fn cook(
    conn: &mut database::Connection,
    requester: Requester,
    name: &str,
    amounts: Vec<crate::recipes::IngredientAmount>,
) -> crate::database::models::RecipeId {
    use crate::recipes::{create_recipe, RecipePayload};

    let payload = RecipePayload {
        name: name.into(),
        text: "Season to taste.".into(),
        cooking_time: 20,
        image: crate::recipes::image::png_data_uri(),
        tags: vec![crate::catalog::tags::list_tags(conn).unwrap()[0].id],
        ingredients: amounts,
    };
    create_recipe(conn, requester, &payload).unwrap().id
}

#[test]
fn cart_is_aggregated() {
    use crate::catalog::ingredients::create_ingredient;
    use crate::catalog::tags::create_tag;
    use crate::recipes::IngredientAmount;
    use crate::relations::add_to_cart;

    let mut conn = database::in_memory();
    let alice = users::test_user(&mut conn, "alice");
    let as_alice = Requester::User(alice.id);
    create_tag(&mut conn, "Dinner", "dinner", "#000080").unwrap();
    let salt = create_ingredient(&mut conn, "Salt", "g").unwrap();
    let eggs = create_ingredient(&mut conn, "Eggs", "pcs").unwrap();

    let soup = cook(
        &mut conn,
        as_alice,
        "Soup",
        vec![IngredientAmount {
            id: salt.id,
            amount: 5,
        }],
    );
    let omelette = cook(
        &mut conn,
        as_alice,
        "Omelette",
        vec![
            IngredientAmount {
                id: salt.id,
                amount: 3,
            },
            IngredientAmount {
                id: eggs.id,
                amount: 2,
            },
        ],
    );
    cook(
        &mut conn,
        as_alice,
        "Not in the cart",
        vec![IngredientAmount {
            id: eggs.id,
            amount: 12,
        }],
    );

    assert!(load_shopping_list(&mut conn, alice.id).unwrap().is_empty());

    add_to_cart(&mut conn, as_alice, soup).unwrap();
    add_to_cart(&mut conn, as_alice, omelette).unwrap();

    let list = load_shopping_list(&mut conn, alice.id).unwrap();
    let lines: Vec<_> = list.items.iter().map(|i| i.to_string()).collect();
    assert_eq!(lines, ["Eggs (pcs) - 2", "Salt (g) - 8"]);
}

#[test]
fn download_names_the_file() {
    use crate::error::Error;

    let mut conn = database::in_memory();
    let alice = users::test_user(&mut conn, "alice");
    let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();

    let file = download(&mut conn, Requester::User(alice.id), date).unwrap();
    assert_eq!(file.filename, "shopping-list-alice-2024-03-09.txt");
    assert_eq!(file.content_type, "text/plain; charset=utf-8");
    assert_eq!(
        file.content_disposition,
        "attachment; filename=\"shopping-list-alice-2024-03-09.txt\"; \
         filename*=UTF-8''shopping-list-alice-2024-03-09.txt"
    );
    assert_eq!(file.body, format!("{HEADER}\n"));

    assert!(matches!(
        download(&mut conn, Requester::Anonymous, date),
        Err(Error::Unauthenticated)
    ));
}

#[test]
fn download_header_is_ascii_for_unicode_usernames() {
    let mut conn = database::in_memory();
    let ivan = users::test_user(&mut conn, "Иван");
    let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();

    let file = download(&mut conn, Requester::User(ivan.id), date).unwrap();
    assert_eq!(file.filename, "shopping-list-Иван-2024-03-09.txt");
    assert!(file.content_disposition.is_ascii());
    assert_eq!(
        file.content_disposition,
        "attachment; filename=\"shopping-list-____-2024-03-09.txt\"; \
         filename*=UTF-8''shopping-list-%D0%98%D0%B2%D0%B0%D0%BD-2024-03-09.txt"
    );
}

#[test]
fn save_to_directory() {
    let dir = tempfile::tempdir().unwrap();
    let file = ShoppingListDownload {
        filename: "shopping-list-alice-2024-03-09.txt".into(),
        content_type: "text/plain; charset=utf-8".into(),
        content_disposition: String::new(),
        body: render(&aggregate(vec![row("Salt", "g", 5)])),
    };

    let path = file.save_to(&dir.path().join("shopping-lists")).unwrap();
    assert_eq!(path.file_name().unwrap(), "shopping-list-alice-2024-03-09.txt");
    assert_eq!(std::fs::read_to_string(&path).unwrap(), file.body);
}
