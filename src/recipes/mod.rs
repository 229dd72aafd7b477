// Copyright 2023 Remi Bernotavicius

use crate::catalog::tags::TagView;
use crate::database;
use crate::database::models::{
    Ingredient, IngredientId, NewRecipe, NewRecipeIngredient, Recipe, RecipeId, RecipeIngredient,
    RecipeTag, Tag, TagId, UserId,
};
use crate::database::schema::{
    favorites, ingredients, recipe_ingredients, recipe_tags, recipes, shopping_cart, tags,
};
use crate::error::{Error, Result};
use crate::relations;
use crate::users::{self, Requester, UserView};
use diesel::prelude::Connection as _;
use diesel::prelude::OptionalExtension as _;
use diesel::BelongingToDsl as _;
use diesel::ExpressionMethods as _;
use diesel::QueryDsl as _;
use diesel::RunQueryDsl as _;
use diesel::SelectableHelper as _;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

pub mod image;

pub use image::RecipeImage;

pub const MIN_AMOUNT: i64 = 1;
pub const MAX_AMOUNT: i64 = 32000;
pub const MIN_COOKING_TIME: i64 = 1;
pub const MAX_COOKING_TIME: i64 = 32767;
const MAX_NAME_LENGTH: usize = 200;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IngredientAmount {
    pub id: IngredientId,
    pub amount: i64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RecipePayload {
    pub name: String,
    pub text: String,
    pub cooking_time: i64,
    pub image: String,
    pub tags: Vec<TagId>,
    pub ingredients: Vec<IngredientAmount>,
}

/// A partial update. The scalar fields are optional, but the tag set and ingredient list are
/// always replaced wholesale.
#[derive(Deserialize, Debug, Clone)]
pub struct RecipeUpdate {
    pub name: Option<String>,
    pub text: Option<String>,
    pub cooking_time: Option<i64>,
    pub image: Option<String>,
    pub tags: Vec<TagId>,
    pub ingredients: Vec<IngredientAmount>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RecipeIngredientView {
    pub id: IngredientId,
    pub name: String,
    pub measurement_unit: String,
    pub amount: i32,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RecipeView {
    pub id: RecipeId,
    pub tags: Vec<TagView>,
    pub author: UserView,
    pub ingredients: Vec<RecipeIngredientView>,
    pub is_favorited: bool,
    pub is_in_shopping_cart: bool,
    pub name: String,
    pub image: String,
    pub text: String,
    pub cooking_time: i32,
}

/// The compact form used in favorite, cart and subscription responses.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RecipeShortView {
    pub id: RecipeId,
    pub name: String,
    pub image: String,
    pub cooking_time: i32,
}

impl From<Recipe> for RecipeShortView {
    fn from(recipe: Recipe) -> Self {
        Self {
            image: image::data_uri(&recipe.image_format, &recipe.image),
            id: recipe.id,
            name: recipe.name,
            cooking_time: recipe.cooking_time,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct RecipeFilter {
    pub author: Option<UserId>,
    /// Tag slugs; a recipe matches when it carries any of them.
    pub tags: Vec<String>,
    pub is_favorited: bool,
    pub is_in_shopping_cart: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct AdminRecipeRow {
    pub id: RecipeId,
    pub name: String,
    pub author: String,
    pub in_favorites: usize,
}

pub fn validate_amount(amount: i64) -> Result<i32> {
    if !(MIN_AMOUNT..=MAX_AMOUNT).contains(&amount) {
        return Err(Error::validation(
            "amount",
            format!("Amount must be between {MIN_AMOUNT} and {MAX_AMOUNT}."),
        ));
    }
    Ok(amount as i32)
}

pub fn validate_cooking_time(cooking_time: i64) -> Result<i32> {
    if !(MIN_COOKING_TIME..=MAX_COOKING_TIME).contains(&cooking_time) {
        return Err(Error::validation(
            "cooking_time",
            format!(
                "Cooking time must be between {MIN_COOKING_TIME} and {MAX_COOKING_TIME} minutes."
            ),
        ));
    }
    Ok(cooking_time as i32)
}

fn validate_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LENGTH {
        return Err(Error::validation(
            "name",
            format!("Must be between 1 and {MAX_NAME_LENGTH} characters."),
        ));
    }
    Ok(name)
}

fn validate_text(text: &str) -> Result<&str> {
    if text.trim().is_empty() {
        return Err(Error::validation("text", "This field may not be blank."));
    }
    Ok(text)
}

fn validate_tags(conn: &mut database::Connection, tag_ids: &[TagId]) -> Result<()> {
    if tag_ids.is_empty() {
        return Err(Error::validation("tags", "At least one tag is required."));
    }
    let unique: BTreeSet<_> = tag_ids.iter().copied().collect();
    if unique.len() != tag_ids.len() {
        return Err(Error::validation("tags", "Tags must not repeat."));
    }

    let known: Vec<TagId> = tags::table
        .filter(tags::id.eq_any(tag_ids.to_vec()))
        .select(tags::id)
        .load(conn)?;
    if let Some(missing) = tag_ids.iter().find(|&t| !known.contains(t)) {
        return Err(Error::NotFound(format!("No tag with id {missing}.")));
    }
    Ok(())
}

fn validate_ingredients(
    conn: &mut database::Connection,
    amounts: &[IngredientAmount],
) -> Result<Vec<(IngredientId, i32)>> {
    if amounts.is_empty() {
        return Err(Error::validation("ingredients", "At least one ingredient is required."));
    }
    let unique: BTreeSet<_> = amounts.iter().map(|a| a.id).collect();
    if unique.len() != amounts.len() {
        return Err(Error::validation("ingredients", "Ingredients must not repeat."));
    }
    let validated = amounts
        .iter()
        .map(|a| -> Result<_> { Ok((a.id, validate_amount(a.amount)?)) })
        .collect::<Result<Vec<_>>>()?;

    let ids: Vec<IngredientId> = unique.into_iter().collect();
    let known: Vec<IngredientId> = ingredients::table
        .filter(ingredients::id.eq_any(ids.clone()))
        .select(ingredients::id)
        .load(conn)?;
    if let Some(missing) = ids.iter().find(|&i| !known.contains(i)) {
        return Err(Error::NotFound(format!("No ingredient with id {missing}.")));
    }
    Ok(validated)
}

/// Replaces the tag set and ingredient rows of a recipe. Callers run this inside the same
/// transaction that wrote the recipe row.
fn replace_tags_and_ingredients(
    conn: &mut database::Connection,
    recipe_id: RecipeId,
    tag_ids: &[TagId],
    amounts: &[(IngredientId, i32)],
) -> Result<()> {
    diesel::delete(recipe_tags::table.filter(recipe_tags::recipe_id.eq(recipe_id))).execute(conn)?;
    diesel::delete(recipe_ingredients::table.filter(recipe_ingredients::recipe_id.eq(recipe_id)))
        .execute(conn)?;

    let new_tags: Vec<_> = tag_ids
        .iter()
        .map(|&tag_id| RecipeTag { recipe_id, tag_id })
        .collect();
    diesel::insert_into(recipe_tags::table)
        .values(&new_tags)
        .execute(conn)?;

    let new_ingredients: Vec<_> = amounts
        .iter()
        .map(|&(ingredient_id, amount)| NewRecipeIngredient {
            recipe_id,
            ingredient_id,
            amount,
        })
        .collect();
    diesel::insert_into(recipe_ingredients::table)
        .values(&new_ingredients)
        .execute(conn)?;
    Ok(())
}

pub fn load_recipe(conn: &mut database::Connection, recipe_id: RecipeId) -> Result<Recipe> {
    recipes::table
        .select(Recipe::as_select())
        .filter(recipes::id.eq(recipe_id))
        .get_result(conn)
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("No recipe with id {recipe_id}.")))
}

fn load_owned_recipe(
    conn: &mut database::Connection,
    requester: Requester,
    recipe_id: RecipeId,
) -> Result<Recipe> {
    let user = requester.require()?;
    let recipe = load_recipe(conn, recipe_id)?;
    if recipe.author_id != user {
        return Err(Error::PermissionDenied("Only the author may change this recipe.".into()));
    }
    Ok(recipe)
}

pub fn create_recipe(
    conn: &mut database::Connection,
    requester: Requester,
    payload: &RecipePayload,
) -> Result<RecipeView> {
    let author = requester.require()?;
    let name = validate_name(&payload.name)?;
    let text = validate_text(&payload.text)?;
    let cooking_time = validate_cooking_time(payload.cooking_time)?;
    let image = RecipeImage::from_data_uri(&payload.image)?;

    let recipe = conn.transaction::<_, Error, _>(|conn| {
        validate_tags(conn, &payload.tags)?;
        let amounts = validate_ingredients(conn, &payload.ingredients)?;

        let recipe = diesel::insert_into(recipes::table)
            .values(NewRecipe {
                author_id: author,
                name,
                image: &image.bytes,
                image_format: &image.format,
                text,
                cooking_time,
                created_at: chrono::Utc::now().naive_utc(),
            })
            .returning(Recipe::as_returning())
            .get_result(conn)?;
        replace_tags_and_ingredients(conn, recipe.id, &payload.tags, &amounts)?;
        Ok(recipe)
    })?;

    log::info!("user {author} created recipe {} ({})", recipe.name, recipe.id);
    render_recipe(conn, requester, recipe)
}

/// Patches the scalar fields and fully replaces tags and ingredients, all in one transaction.
pub fn update_recipe(
    conn: &mut database::Connection,
    requester: Requester,
    recipe_id: RecipeId,
    update: &RecipeUpdate,
) -> Result<RecipeView> {
    let recipe = load_owned_recipe(conn, requester, recipe_id)?;

    let name = match &update.name {
        Some(name) => validate_name(name)?,
        None => recipe.name.as_str(),
    };
    let text = match &update.text {
        Some(text) => validate_text(text)?,
        None => recipe.text.as_str(),
    };
    let cooking_time = match update.cooking_time {
        Some(cooking_time) => validate_cooking_time(cooking_time)?,
        None => recipe.cooking_time,
    };
    let image = match &update.image {
        Some(uri) => RecipeImage::from_data_uri(uri)?,
        None => RecipeImage {
            bytes: recipe.image.clone(),
            format: recipe.image_format.clone(),
        },
    };

    conn.transaction::<_, Error, _>(|conn| {
        validate_tags(conn, &update.tags)?;
        let amounts = validate_ingredients(conn, &update.ingredients)?;

        diesel::update(recipes::table.filter(recipes::id.eq(recipe_id)))
            .set((
                recipes::name.eq(name),
                recipes::text.eq(text),
                recipes::cooking_time.eq(cooking_time),
                recipes::image.eq(image.bytes.as_slice()),
                recipes::image_format.eq(image.format.as_str()),
            ))
            .execute(conn)?;
        replace_tags_and_ingredients(conn, recipe_id, &update.tags, &amounts)
    })?;

    log::info!("updated recipe {recipe_id}");
    let recipe = load_recipe(conn, recipe_id)?;
    render_recipe(conn, requester, recipe)
}

/// Ingredient rows, tags, favorites and cart entries go with the recipe; the ingredient catalog
/// stays as it is.
pub fn delete_recipe(
    conn: &mut database::Connection,
    requester: Requester,
    recipe_id: RecipeId,
) -> Result<()> {
    load_owned_recipe(conn, requester, recipe_id)?;
    diesel::delete(recipes::table.filter(recipes::id.eq(recipe_id))).execute(conn)?;
    log::info!("deleted recipe {recipe_id}");
    Ok(())
}

pub fn tags_of(conn: &mut database::Connection, recipe_id: RecipeId) -> Result<Vec<Tag>> {
    Ok(recipe_tags::table
        .inner_join(tags::table)
        .filter(recipe_tags::recipe_id.eq(recipe_id))
        .select(Tag::as_select())
        .order(tags::name)
        .load(conn)?)
}

pub fn ingredients_of(
    conn: &mut database::Connection,
    recipe: &Recipe,
) -> Result<Vec<(RecipeIngredient, Ingredient)>> {
    Ok(RecipeIngredient::belonging_to(recipe)
        .inner_join(ingredients::table)
        .select((RecipeIngredient::as_select(), Ingredient::as_select()))
        .order(ingredients::name)
        .load(conn)?)
}

pub fn render_recipe(
    conn: &mut database::Connection,
    requester: Requester,
    recipe: Recipe,
) -> Result<RecipeView> {
    let tags = tags_of(conn, recipe.id)?
        .into_iter()
        .map(TagView::from)
        .collect();
    let ingredients = ingredients_of(conn, &recipe)?
        .into_iter()
        .map(|(usage, ingredient)| RecipeIngredientView {
            id: ingredient.id,
            name: ingredient.name,
            measurement_unit: ingredient.measurement_unit,
            amount: usage.amount,
        })
        .collect();
    let author = users::get_user(conn, recipe.author_id)?;
    let author = users::user_view(conn, requester, author)?;

    Ok(RecipeView {
        is_favorited: relations::is_favorited(conn, requester, recipe.id)?,
        is_in_shopping_cart: relations::is_in_shopping_cart(conn, requester, recipe.id)?,
        image: image::data_uri(&recipe.image_format, &recipe.image),
        id: recipe.id,
        tags,
        author,
        ingredients,
        name: recipe.name,
        text: recipe.text,
        cooking_time: recipe.cooking_time,
    })
}

pub fn get_recipe(
    conn: &mut database::Connection,
    requester: Requester,
    recipe_id: RecipeId,
) -> Result<RecipeView> {
    let recipe = load_recipe(conn, recipe_id)?;
    render_recipe(conn, requester, recipe)
}

fn intersect(current: Option<Vec<RecipeId>>, ids: Vec<RecipeId>) -> Option<Vec<RecipeId>> {
    Some(match current {
        Some(current) => current.into_iter().filter(|id| ids.contains(id)).collect(),
        None => ids,
    })
}

/// Newest first. The favorited and in-cart filters only apply to an authenticated requester.
pub fn list_recipes(
    conn: &mut database::Connection,
    requester: Requester,
    filter: &RecipeFilter,
) -> Result<Vec<RecipeView>> {
    let mut candidates: Option<Vec<RecipeId>> = None;

    if !filter.tags.is_empty() {
        let tagged: Vec<RecipeId> = recipe_tags::table
            .inner_join(tags::table)
            .filter(tags::slug.eq_any(filter.tags.clone()))
            .select(recipe_tags::recipe_id)
            .distinct()
            .load(conn)?;
        candidates = intersect(candidates, tagged);
    }
    if let Some(user) = requester.user_id() {
        if filter.is_favorited {
            let favorited: Vec<RecipeId> = favorites::table
                .filter(favorites::user_id.eq(user))
                .select(favorites::recipe_id)
                .load(conn)?;
            candidates = intersect(candidates, favorited);
        }
        if filter.is_in_shopping_cart {
            let in_cart: Vec<RecipeId> = shopping_cart::table
                .filter(shopping_cart::user_id.eq(user))
                .select(shopping_cart::recipe_id)
                .load(conn)?;
            candidates = intersect(candidates, in_cart);
        }
    }

    let mut query = recipes::table
        .select(Recipe::as_select())
        .order((recipes::created_at.desc(), recipes::id.desc()))
        .into_boxed();
    if let Some(author) = filter.author {
        query = query.filter(recipes::author_id.eq(author));
    }
    if let Some(ids) = candidates {
        query = query.filter(recipes::id.eq_any(ids));
    }
    let found = query.load(conn)?;
    log::debug!("{} recipes match {filter:?}", found.len());

    found
        .into_iter()
        .map(|recipe| render_recipe(conn, requester, recipe))
        .collect()
}

/// The administrative listing: every recipe whose name contains `query` (case-insensitively),
/// with its author and how many users favorited it.
pub fn admin_recipes(conn: &mut database::Connection, query: &str) -> Result<Vec<AdminRecipeRow>> {
    let rows: Vec<(RecipeId, String, String)> = recipes::table
        .inner_join(database::schema::users::table)
        .select((recipes::id, recipes::name, database::schema::users::username))
        .order(recipes::name)
        .load(conn)?;

    let mut in_favorites: HashMap<RecipeId, usize> = HashMap::new();
    let favorited: Vec<RecipeId> = favorites::table.select(favorites::recipe_id).load(conn)?;
    for recipe_id in favorited {
        *in_favorites.entry(recipe_id).or_default() += 1;
    }

    let needle = query.to_lowercase();
    Ok(rows
        .into_iter()
        .filter(|(_, name, _)| name.to_lowercase().contains(&needle))
        .map(|(id, name, author)| AdminRecipeRow {
            in_favorites: in_favorites.get(&id).copied().unwrap_or(0),
            id,
            name,
            author,
        })
        .collect())
}

#[cfg(test)]
mod tests;
