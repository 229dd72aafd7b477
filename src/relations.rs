// Copyright 2023 Remi Bernotavicius

use crate::database;
use crate::database::models::{CartEntry, Favorite, Recipe, RecipeId, Subscription, UserId};
use crate::database::schema::{favorites, recipes, shopping_cart, subscriptions};
use crate::error::{ConflictExt as _, Error, Result};
use crate::recipes::{load_recipe, RecipeShortView};
use crate::users::{self, Requester, UserView};
use diesel::ExpressionMethods as _;
use diesel::QueryDsl as _;
use diesel::RunQueryDsl as _;
use diesel::SelectableHelper as _;
use serde::Serialize;

pub fn is_favorited(
    conn: &mut database::Connection,
    requester: Requester,
    recipe_id: RecipeId,
) -> Result<bool> {
    let Some(user) = requester.user_id() else {
        return Ok(false);
    };
    let count: i64 = favorites::table
        .filter(favorites::user_id.eq(user))
        .filter(favorites::recipe_id.eq(recipe_id))
        .count()
        .get_result(conn)?;
    Ok(count > 0)
}

pub fn is_in_shopping_cart(
    conn: &mut database::Connection,
    requester: Requester,
    recipe_id: RecipeId,
) -> Result<bool> {
    let Some(user) = requester.user_id() else {
        return Ok(false);
    };
    let count: i64 = shopping_cart::table
        .filter(shopping_cart::user_id.eq(user))
        .filter(shopping_cart::recipe_id.eq(recipe_id))
        .count()
        .get_result(conn)?;
    Ok(count > 0)
}

pub fn add_favorite(
    conn: &mut database::Connection,
    requester: Requester,
    recipe_id: RecipeId,
) -> Result<RecipeShortView> {
    let user = requester.require()?;
    let recipe = load_recipe(conn, recipe_id)?;

    let message = "This recipe is already in favorites.";
    if is_favorited(conn, requester, recipe_id)? {
        return Err(Error::Conflict(message.into()));
    }
    diesel::insert_into(favorites::table)
        .values(Favorite {
            user_id: user,
            recipe_id,
        })
        .execute(conn)
        .or_conflict(message)?;

    log::info!("user {user} favorited recipe {recipe_id}");
    Ok(recipe.into())
}

pub fn remove_favorite(
    conn: &mut database::Connection,
    requester: Requester,
    recipe_id: RecipeId,
) -> Result<()> {
    let user = requester.require()?;
    load_recipe(conn, recipe_id)?;

    let deleted = diesel::delete(
        favorites::table
            .filter(favorites::user_id.eq(user))
            .filter(favorites::recipe_id.eq(recipe_id)),
    )
    .execute(conn)?;
    if deleted == 0 {
        return Err(Error::NotFound("This recipe is not in favorites.".into()));
    }
    log::info!("user {user} unfavorited recipe {recipe_id}");
    Ok(())
}

pub fn add_to_cart(
    conn: &mut database::Connection,
    requester: Requester,
    recipe_id: RecipeId,
) -> Result<RecipeShortView> {
    let user = requester.require()?;
    let recipe = load_recipe(conn, recipe_id)?;

    let message = "This recipe is already in the shopping cart.";
    if is_in_shopping_cart(conn, requester, recipe_id)? {
        return Err(Error::Conflict(message.into()));
    }
    diesel::insert_into(shopping_cart::table)
        .values(CartEntry {
            user_id: user,
            recipe_id,
        })
        .execute(conn)
        .or_conflict(message)?;

    log::info!("user {user} added recipe {recipe_id} to the shopping cart");
    Ok(recipe.into())
}

pub fn remove_from_cart(
    conn: &mut database::Connection,
    requester: Requester,
    recipe_id: RecipeId,
) -> Result<()> {
    let user = requester.require()?;
    load_recipe(conn, recipe_id)?;

    let deleted = diesel::delete(
        shopping_cart::table
            .filter(shopping_cart::user_id.eq(user))
            .filter(shopping_cart::recipe_id.eq(recipe_id)),
    )
    .execute(conn)?;
    if deleted == 0 {
        return Err(Error::NotFound("This recipe is not in the shopping cart.".into()));
    }
    log::info!("user {user} removed recipe {recipe_id} from the shopping cart");
    Ok(())
}

/// An author as seen from one of their subscribers.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionView {
    #[serde(flatten)]
    pub user: UserView,
    pub recipes: Vec<RecipeShortView>,
    pub recipes_count: i64,
}

fn subscription_view(
    conn: &mut database::Connection,
    requester: Requester,
    author: UserId,
    recipes_limit: Option<usize>,
) -> Result<SubscriptionView> {
    let user = users::get_user(conn, author)?;
    let user = users::user_view(conn, requester, user)?;

    let recipes_count: i64 = recipes::table
        .filter(recipes::author_id.eq(author))
        .count()
        .get_result(conn)?;

    let mut query = recipes::table
        .select(Recipe::as_select())
        .filter(recipes::author_id.eq(author))
        .order((recipes::created_at.desc(), recipes::id.desc()))
        .into_boxed();
    if let Some(limit) = recipes_limit {
        query = query.limit(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    let recipes = query
        .load(conn)?
        .into_iter()
        .map(RecipeShortView::from)
        .collect();

    Ok(SubscriptionView {
        user,
        recipes,
        recipes_count,
    })
}

pub fn subscribe(
    conn: &mut database::Connection,
    requester: Requester,
    author: UserId,
    recipes_limit: Option<usize>,
) -> Result<SubscriptionView> {
    let follower = requester.require()?;
    users::get_user(conn, author)?;
    if follower == author {
        return Err(Error::validation("author", "You cannot subscribe to yourself."));
    }

    let message = "You are already subscribed to this author.";
    if users::is_subscribed(conn, requester, author)? {
        return Err(Error::Conflict(message.into()));
    }
    diesel::insert_into(subscriptions::table)
        .values(Subscription {
            user_id: follower,
            author_id: author,
        })
        .execute(conn)
        .or_conflict(message)?;

    log::info!("user {follower} subscribed to {author}");
    subscription_view(conn, requester, author, recipes_limit)
}

pub fn unsubscribe(
    conn: &mut database::Connection,
    requester: Requester,
    author: UserId,
) -> Result<()> {
    let follower = requester.require()?;
    users::get_user(conn, author)?;

    let deleted = diesel::delete(
        subscriptions::table
            .filter(subscriptions::user_id.eq(follower))
            .filter(subscriptions::author_id.eq(author)),
    )
    .execute(conn)?;
    if deleted == 0 {
        return Err(Error::NotFound("You are not subscribed to this author.".into()));
    }
    log::info!("user {follower} unsubscribed from {author}");
    Ok(())
}

/// Every author the requester follows, by author id, each with their newest recipes.
pub fn subscriptions(
    conn: &mut database::Connection,
    requester: Requester,
    recipes_limit: Option<usize>,
) -> Result<Vec<SubscriptionView>> {
    let follower = requester.require()?;
    let authors: Vec<UserId> = subscriptions::table
        .filter(subscriptions::user_id.eq(follower))
        .select(subscriptions::author_id)
        .order(subscriptions::author_id)
        .load(conn)?;
    log::debug!("user {follower} follows {} authors", authors.len());

    authors
        .into_iter()
        .map(|author| subscription_view(conn, requester, author, recipes_limit))
        .collect()
}

#[cfg(test)]
fn publish(
    conn: &mut database::Connection,
    author: &crate::database::models::User,
    name: &str,
) -> RecipeId {
    use crate::catalog::ingredients::{create_ingredient, search_ingredients};
    use crate::catalog::tags::{create_tag, list_tags};
    use crate::recipes::{create_recipe, IngredientAmount, RecipePayload};

    let tag = match list_tags(conn).unwrap().into_iter().next() {
        Some(tag) => tag,
        None => create_tag(conn, "Dinner", "dinner", "#000080").unwrap(),
    };
    let eggs = match search_ingredients(conn, "").unwrap().into_iter().next() {
        Some(eggs) => eggs,
        None => create_ingredient(conn, "Eggs", "pcs").unwrap(),
    };
    let payload = RecipePayload {
        name: name.into(),
        text: "Cook it.".into(),
        cooking_time: 5,
        image: crate::recipes::image::png_data_uri(),
        tags: vec![tag.id],
        ingredients: vec![IngredientAmount {
            id: eggs.id,
            amount: 2,
        }],
    };
    create_recipe(conn, Requester::User(author.id), &payload).unwrap().id
}

#[test]
fn favorite_twice_conflicts() {
    let mut conn = database::in_memory();
    let alice = users::test_user(&mut conn, "alice");
    let bob = Requester::User(users::test_user(&mut conn, "bob").id);
    let recipe = publish(&mut conn, &alice, "Omelette");

    let short = add_favorite(&mut conn, bob, recipe).unwrap();
    assert_eq!(short.id, recipe);
    assert_eq!(short.name, "Omelette");
    assert!(matches!(
        add_favorite(&mut conn, bob, recipe),
        Err(Error::Conflict(_))
    ));

    remove_favorite(&mut conn, bob, recipe).unwrap();
    assert!(!is_favorited(&mut conn, bob, recipe).unwrap());
    assert!(matches!(
        remove_favorite(&mut conn, bob, recipe),
        Err(Error::NotFound(_))
    ));

    add_favorite(&mut conn, bob, recipe).unwrap();
    assert!(is_favorited(&mut conn, bob, recipe).unwrap());
}

#[test]
fn cart_toggles() {
    let mut conn = database::in_memory();
    let alice = users::test_user(&mut conn, "alice");
    let bob = Requester::User(users::test_user(&mut conn, "bob").id);
    let recipe = publish(&mut conn, &alice, "Omelette");

    add_to_cart(&mut conn, bob, recipe).unwrap();
    assert!(is_in_shopping_cart(&mut conn, bob, recipe).unwrap());
    assert!(!is_in_shopping_cart(&mut conn, Requester::Anonymous, recipe).unwrap());
    assert!(matches!(
        add_to_cart(&mut conn, bob, recipe),
        Err(Error::Conflict(_))
    ));

    remove_from_cart(&mut conn, bob, recipe).unwrap();
    assert!(matches!(
        remove_from_cart(&mut conn, bob, recipe),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn toggles_need_a_user_and_a_recipe() {
    let mut conn = database::in_memory();
    let alice = users::test_user(&mut conn, "alice");
    let recipe = publish(&mut conn, &alice, "Omelette");

    assert!(matches!(
        add_favorite(&mut conn, Requester::Anonymous, recipe),
        Err(Error::Unauthenticated)
    ));
    assert!(matches!(
        add_to_cart(&mut conn, Requester::User(alice.id), RecipeId::from(999)),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        remove_favorite(&mut conn, Requester::User(alice.id), RecipeId::from(999)),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn subscription_rules() {
    let mut conn = database::in_memory();
    let alice = users::test_user(&mut conn, "alice");
    let bob = users::test_user(&mut conn, "bob");
    let as_bob = Requester::User(bob.id);

    assert!(matches!(
        subscribe(&mut conn, as_bob, bob.id, None),
        Err(Error::Validation { .. })
    ));
    assert!(matches!(
        subscribe(&mut conn, as_bob, UserId::from(999), None),
        Err(Error::NotFound(_))
    ));

    let view = subscribe(&mut conn, as_bob, alice.id, None).unwrap();
    assert_eq!(view.user.username, "alice");
    assert!(view.user.is_subscribed);
    assert_eq!(view.recipes_count, 0);

    assert!(matches!(
        subscribe(&mut conn, as_bob, alice.id, None),
        Err(Error::Conflict(_))
    ));

    unsubscribe(&mut conn, as_bob, alice.id).unwrap();
    assert!(matches!(
        unsubscribe(&mut conn, as_bob, alice.id),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn self_subscription_rejected_by_the_store() {
    let mut conn = database::in_memory();
    let alice = users::test_user(&mut conn, "alice");
    let result = diesel::insert_into(subscriptions::table)
        .values(Subscription {
            user_id: alice.id,
            author_id: alice.id,
        })
        .execute(&mut conn);
    assert!(result.is_err());
}

#[test]
fn subscription_listing() {
    let mut conn = database::in_memory();
    let alice = users::test_user(&mut conn, "alice");
    let bob = users::test_user(&mut conn, "bob");
    let carol = users::test_user(&mut conn, "carol");
    let as_carol = Requester::User(carol.id);

    publish(&mut conn, &alice, "First");
    publish(&mut conn, &alice, "Second");
    let third = publish(&mut conn, &alice, "Third");

    subscribe(&mut conn, as_carol, bob.id, None).unwrap();
    subscribe(&mut conn, as_carol, alice.id, None).unwrap();

    let listing = subscriptions(&mut conn, as_carol, Some(2)).unwrap();
    assert_eq!(listing.len(), 2);
    assert_eq!(listing[0].user.id, alice.id);
    assert_eq!(listing[0].recipes_count, 3);
    assert_eq!(listing[0].recipes.len(), 2);
    assert_eq!(listing[0].recipes[0].id, third);
    assert_eq!(listing[1].user.username, "bob");
    assert!(listing[1].recipes.is_empty());

    let json = serde_json::to_value(&listing[0]).unwrap();
    assert_eq!(json["username"], "alice");
    assert_eq!(json["is_subscribed"], true);
    assert_eq!(json["recipes_count"], 3);

    let everything = subscriptions(&mut conn, as_carol, None).unwrap();
    assert_eq!(everything[0].recipes.len(), 3);

    users::delete_user(&mut conn, alice.id).unwrap();
    assert_eq!(subscriptions(&mut conn, as_carol, None).unwrap().len(), 1);
}
