// Copyright 2023 Remi Bernotavicius

use crate::database;
use crate::database::models::{Ingredient, IngredientId, NewIngredient};
use crate::error::{ConflictExt as _, Error, Result};
use diesel::prelude::OptionalExtension as _;
use diesel::ExpressionMethods as _;
use diesel::QueryDsl as _;
use diesel::RunQueryDsl as _;
use diesel::SelectableHelper as _;

const MAX_NAME_LENGTH: usize = 100;
const MAX_UNIT_LENGTH: usize = 20;

pub fn create_ingredient(
    conn: &mut database::Connection,
    new_name: &str,
    new_unit: &str,
) -> Result<Ingredient> {
    use database::schema::ingredients::dsl::*;

    let new_name = new_name.trim();
    let new_unit = new_unit.trim();
    if new_name.is_empty() || new_name.chars().count() > MAX_NAME_LENGTH {
        return Err(Error::validation(
            "name",
            format!("Must be between 1 and {MAX_NAME_LENGTH} characters."),
        ));
    }
    if new_unit.is_empty() || new_unit.chars().count() > MAX_UNIT_LENGTH {
        return Err(Error::validation(
            "measurement_unit",
            format!("Must be between 1 and {MAX_UNIT_LENGTH} characters."),
        ));
    }

    let duplicate_message = format!("Ingredient {new_name} ({new_unit}) already exists.");
    let existing: i64 = ingredients
        .filter(name.eq(new_name))
        .filter(measurement_unit.eq(new_unit))
        .count()
        .get_result(conn)?;
    if existing > 0 {
        return Err(Error::Conflict(duplicate_message));
    }

    let ingredient = diesel::insert_into(ingredients)
        .values(NewIngredient {
            name: new_name,
            measurement_unit: new_unit,
        })
        .returning(Ingredient::as_returning())
        .get_result(conn)
        .or_conflict(&duplicate_message)?;

    log::info!("added ingredient {} ({})", ingredient.name, ingredient.id);
    Ok(ingredient)
}

pub fn get_ingredient(
    conn: &mut database::Connection,
    ingredient_id: IngredientId,
) -> Result<Ingredient> {
    use database::schema::ingredients::dsl::*;

    ingredients
        .select(Ingredient::as_select())
        .filter(id.eq(ingredient_id))
        .get_result(conn)
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("No ingredient with id {ingredient_id}.")))
}

/// Removing an ingredient also removes it from every recipe that used it.
pub fn delete_ingredient(conn: &mut database::Connection, delete_id: IngredientId) -> Result<()> {
    use database::schema::ingredients::dsl::*;

    let deleted = diesel::delete(ingredients.filter(id.eq(delete_id))).execute(conn)?;
    if deleted == 0 {
        return Err(Error::NotFound(format!("No ingredient with id {delete_id}.")));
    }
    log::info!("deleted ingredient {delete_id}");
    Ok(())
}

/// Case-insensitive substring search on the ingredient name. Names that start with the query
/// come first, the rest follow; both groups are ordered by name.
///
/// The match is done here rather than with `LIKE` because SQLite only folds ASCII case.
pub fn search_ingredients(conn: &mut database::Connection, query: &str) -> Result<Vec<Ingredient>> {
    use database::schema::ingredients::dsl::*;

    let all: Vec<Ingredient> = ingredients
        .select(Ingredient::as_select())
        .order((name, measurement_unit))
        .load(conn)?;

    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Ok(all);
    }

    let (mut prefixed, mut contained): (Vec<_>, Vec<_>) = (vec![], vec![]);
    for ingredient in all {
        let haystack = ingredient.name.to_lowercase();
        if haystack.starts_with(&needle) {
            prefixed.push(ingredient);
        } else if haystack.contains(&needle) {
            contained.push(ingredient);
        }
    }
    log::debug!(
        "ingredient search {query:?}: {} prefix and {} substring matches",
        prefixed.len(),
        contained.len()
    );

    prefixed.append(&mut contained);
    Ok(prefixed)
}

#[cfg(test)]
fn names(found: &[Ingredient]) -> Vec<&str> {
    found.iter().map(|i| i.name.as_str()).collect()
}

#[test]
fn search_is_case_insensitive_substring() {
    let mut conn = database::in_memory();
    for (n, u) in [
        ("Eggs", "pcs"),
        ("Scrambled eggs", "g"),
        ("Eggplant", "g"),
        ("Salt", "g"),
    ] {
        create_ingredient(&mut conn, n, u).unwrap();
    }

    let found = search_ingredients(&mut conn, "egg").unwrap();
    assert_eq!(names(&found), ["Eggplant", "Eggs", "Scrambled eggs"]);

    let found = search_ingredients(&mut conn, "EGGS").unwrap();
    assert_eq!(names(&found), ["Eggs", "Scrambled eggs"]);

    let found = search_ingredients(&mut conn, "").unwrap();
    assert_eq!(found.len(), 4);

    assert!(search_ingredients(&mut conn, "pepper").unwrap().is_empty());
}

#[test]
fn search_folds_non_ascii_case() {
    let mut conn = database::in_memory();
    create_ingredient(&mut conn, "Яйца куриные", "шт").unwrap();

    let found = search_ingredients(&mut conn, "яйца").unwrap();
    assert_eq!(names(&found), ["Яйца куриные"]);
}

#[test]
fn name_and_unit_are_unique_together() {
    let mut conn = database::in_memory();
    create_ingredient(&mut conn, "Salt", "g").unwrap();
    create_ingredient(&mut conn, "Salt", "pinch").unwrap();

    assert!(matches!(
        create_ingredient(&mut conn, "Salt", "g"),
        Err(Error::Conflict(_))
    ));
    assert!(matches!(
        create_ingredient(&mut conn, "", "g"),
        Err(Error::Validation { .. })
    ));
    assert!(matches!(
        create_ingredient(&mut conn, "Salt", "a very long unit name indeed"),
        Err(Error::Validation { .. })
    ));
}

#[test]
fn get_and_delete() {
    let mut conn = database::in_memory();
    let salt = create_ingredient(&mut conn, "Salt", "g").unwrap();
    assert_eq!(get_ingredient(&mut conn, salt.id).unwrap(), salt);

    delete_ingredient(&mut conn, salt.id).unwrap();
    assert!(matches!(
        get_ingredient(&mut conn, salt.id),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        delete_ingredient(&mut conn, salt.id),
        Err(Error::NotFound(_))
    ));
}
