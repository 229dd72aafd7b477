// Copyright 2023 Remi Bernotavicius

use crate::database;
use crate::database::models::{NewUser, User, UserId};
use crate::error::{ConflictExt as _, Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use diesel::prelude::OptionalExtension as _;
use diesel::ExpressionMethods as _;
use diesel::QueryDsl as _;
use diesel::RunQueryDsl as _;
use diesel::SelectableHelper as _;
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq as _;

/// Kept free so `/users/me/` can never be shadowed by an account.
pub const RESERVED_USERNAME: &str = "me";

const MAX_EMAIL_LENGTH: usize = 254;
const MAX_NAME_LENGTH: usize = 150;
const HASH_SCHEME: &str = "pbkdf2_sha256";
const HASH_LENGTH: usize = 32;
/// Stored with every hash, so raising it only affects passwords set afterwards.
const ITERATIONS: u32 = if cfg!(test) { 1_000 } else { 600_000 };

/// Who is asking. Every identity-relative computation receives one of these explicitly.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Requester {
    Anonymous,
    User(UserId),
}

impl Requester {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::Anonymous => None,
            Self::User(id) => Some(*id),
        }
    }

    pub fn require(&self) -> Result<UserId> {
        self.user_id().ok_or(Error::Unauthenticated)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct UserView {
    pub email: String,
    pub id: UserId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_subscribed: bool,
}

impl UserView {
    pub fn new(user: User, is_subscribed: bool) -> Self {
        Self {
            email: user.email,
            id: user.id,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            is_subscribed,
        }
    }
}

pub struct UserRegistration<'a> {
    pub email: &'a str,
    pub username: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub password: &'a str,
}

fn derive_key(salt: &[u8], password: &str, iterations: u32) -> [u8; HASH_LENGTH] {
    let mut derived = [0; HASH_LENGTH];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut derived);
    derived
}

/// `pbkdf2_sha256$<iterations>$<salt>$<hash>`, salt and hash base64-encoded.
pub fn hash_password(password: &str) -> String {
    let salt: [u8; 16] = rand::random();
    let derived = derive_key(&salt, password, ITERATIONS);
    format!(
        "{HASH_SCHEME}${ITERATIONS}${}${}",
        BASE64.encode(salt),
        BASE64.encode(derived)
    )
}

pub fn check_password(hashed: &str, password: &str) -> bool {
    let mut parts = hashed.splitn(4, '$');
    let (Some(HASH_SCHEME), Some(iterations), Some(salt), Some(expected)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let (Ok(iterations), Ok(salt), Ok(expected)) = (
        iterations.parse::<u32>(),
        BASE64.decode(salt),
        BASE64.decode(expected),
    ) else {
        return false;
    };
    if iterations == 0 {
        return false;
    }
    derive_key(&salt, password, iterations)[..]
        .ct_eq(&expected[..])
        .into()
}

fn validate_email(email: &str) -> Result<()> {
    let valid = email.chars().count() <= MAX_EMAIL_LENGTH
        && match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.is_empty()
                    && !domain.contains('@')
                    && !email.contains(char::is_whitespace)
            }
            None => false,
        };
    if valid {
        Ok(())
    } else {
        Err(Error::validation("email", "Enter a valid email address."))
    }
}

fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() || username.chars().count() > MAX_NAME_LENGTH {
        return Err(Error::validation(
            "username",
            format!("Username must be between 1 and {MAX_NAME_LENGTH} characters."),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || "@.+-_".contains(c))
    {
        return Err(Error::validation(
            "username",
            "Username may contain only letters, digits and @/./+/-/_ characters.",
        ));
    }
    if username == RESERVED_USERNAME {
        return Err(Error::validation(
            "username",
            format!("Username {RESERVED_USERNAME:?} is reserved."),
        ));
    }
    Ok(())
}

fn validate_name(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() || value.chars().count() > MAX_NAME_LENGTH {
        return Err(Error::validation(
            field,
            format!("Must be between 1 and {MAX_NAME_LENGTH} characters."),
        ));
    }
    Ok(())
}

pub fn create_user(
    conn: &mut database::Connection,
    registration: UserRegistration<'_>,
) -> Result<User> {
    use database::schema::users::dsl::*;

    validate_email(registration.email)?;
    validate_username(registration.username)?;
    validate_name("first_name", registration.first_name)?;
    validate_name("last_name", registration.last_name)?;
    if registration.password.is_empty() {
        return Err(Error::validation("password", "This field may not be blank."));
    }

    let email_taken: i64 = users
        .filter(email.eq(registration.email))
        .count()
        .get_result(conn)?;
    if email_taken > 0 {
        return Err(Error::validation("email", "A user with that email already exists."));
    }
    let username_taken: i64 = users
        .filter(username.eq(registration.username))
        .count()
        .get_result(conn)?;
    if username_taken > 0 {
        return Err(Error::validation("username", "A user with that username already exists."));
    }

    let hashed = hash_password(registration.password);
    let user = diesel::insert_into(users)
        .values(NewUser {
            email: registration.email,
            username: registration.username,
            first_name: registration.first_name,
            last_name: registration.last_name,
            password: &hashed,
        })
        .returning(User::as_returning())
        .get_result(conn)
        .or_conflict("A user with that username or email already exists.")?;

    log::info!("created user {} ({})", user.username, user.id);
    Ok(user)
}

pub fn get_user(conn: &mut database::Connection, user_id: UserId) -> Result<User> {
    use database::schema::users::dsl::*;

    users
        .select(User::as_select())
        .filter(id.eq(user_id))
        .get_result(conn)
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("No user with id {user_id}.")))
}

pub fn find_by_username(conn: &mut database::Connection, name: &str) -> Result<User> {
    use database::schema::users::dsl::*;

    users
        .select(User::as_select())
        .filter(username.eq(name))
        .get_result(conn)
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("No user named {name:?}.")))
}

pub fn list_users(conn: &mut database::Connection) -> Result<Vec<User>> {
    use database::schema::users::dsl::*;

    Ok(users.select(User::as_select()).order(id).load(conn)?)
}

/// Deletes the account along with everything that cascades from it: authored recipes (and
/// their ingredient rows, tags, favorites, cart entries), own favorites and cart entries, and
/// subscriptions in both directions.
pub fn delete_user(conn: &mut database::Connection, user_id: UserId) -> Result<()> {
    use database::schema::users::dsl::*;

    let deleted = diesel::delete(users.filter(id.eq(user_id))).execute(conn)?;
    if deleted == 0 {
        return Err(Error::NotFound(format!("No user with id {user_id}.")));
    }
    log::info!("deleted user {user_id}");
    Ok(())
}

pub fn set_password(
    conn: &mut database::Connection,
    requester: Requester,
    current_password: &str,
    new_password: &str,
) -> Result<()> {
    use database::schema::users::dsl::*;

    let user = get_user(conn, requester.require()?)?;
    if !check_password(&user.password, current_password) {
        return Err(Error::validation("current_password", "Invalid password."));
    }
    if new_password.is_empty() {
        return Err(Error::validation("new_password", "This field may not be blank."));
    }

    diesel::update(users.filter(id.eq(user.id)))
        .set(password.eq(hash_password(new_password)))
        .execute(conn)?;
    log::info!("changed password of {}", user.username);
    Ok(())
}

pub fn is_subscribed(
    conn: &mut database::Connection,
    requester: Requester,
    author: UserId,
) -> Result<bool> {
    use database::schema::subscriptions::dsl::*;

    let Some(follower) = requester.user_id() else {
        return Ok(false);
    };
    if follower == author {
        return Ok(false);
    }
    let count: i64 = subscriptions
        .filter(user_id.eq(follower))
        .filter(author_id.eq(author))
        .count()
        .get_result(conn)?;
    Ok(count > 0)
}

pub fn user_view(
    conn: &mut database::Connection,
    requester: Requester,
    user: User,
) -> Result<UserView> {
    let subscribed = is_subscribed(conn, requester, user.id)?;
    Ok(UserView::new(user, subscribed))
}

#[cfg(test)]
pub fn test_user(conn: &mut database::Connection, name: &str) -> User {
    create_user(
        conn,
        UserRegistration {
            email: &format!("{name}@example.com"),
            username: name,
            first_name: "Test",
            last_name: "User",
            password: "hunter22",
        },
    )
    .unwrap()
}

#[test]
fn password_hashing() {
    let hashed = hash_password("correct horse");
    assert!(check_password(&hashed, "correct horse"));
    assert!(!check_password(&hashed, "battery staple"));
    assert!(!check_password("plaintext", "plaintext"));

    // salted, so the same password hashes differently
    assert_ne!(hashed, hash_password("correct horse"));
}

#[test]
fn password_hash_records_its_iterations() {
    let hashed = hash_password("correct horse");
    let parts: Vec<_> = hashed.split('$').collect();
    assert_eq!(parts.len(), 4);
    assert_eq!(parts[0], "pbkdf2_sha256");
    assert_eq!(parts[1], ITERATIONS.to_string());
    assert_eq!(BASE64.decode(parts[3]).unwrap().len(), HASH_LENGTH);

    // verification uses the stored count, not the current default
    let salt = b"0123456789abcdef";
    let older = format!(
        "pbkdf2_sha256$7${}${}",
        BASE64.encode(salt),
        BASE64.encode(derive_key(salt, "correct horse", 7))
    );
    assert!(check_password(&older, "correct horse"));
    assert!(!check_password(&older.replacen("$7$", "$8$", 1), "correct horse"));
    assert!(!check_password(&older.replacen("$7$", "$0$", 1), "correct horse"));
}

#[test]
fn create_and_find() {
    let mut conn = database::in_memory();
    let alice = test_user(&mut conn, "alice");
    assert_eq!(alice.email, "alice@example.com");
    assert_ne!(alice.password, "hunter22");

    let found = find_by_username(&mut conn, "alice").unwrap();
    assert_eq!(found.id, alice.id);
    assert!(matches!(
        find_by_username(&mut conn, "bob"),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn registration_validation() {
    let mut conn = database::in_memory();
    test_user(&mut conn, "alice");

    let registration = |email, username| UserRegistration {
        email,
        username,
        first_name: "A",
        last_name: "B",
        password: "pw",
    };

    for (email, username, field) in [
        ("alice@example.com", "alice2", "email"),
        ("other@example.com", "alice", "username"),
        ("not-an-email", "carol", "email"),
        ("me@example.com", "me", "username"),
        ("dan@example.com", "dan smith", "username"),
    ] {
        match create_user(&mut conn, registration(email, username)) {
            Err(Error::Validation { field: f, .. }) => assert_eq!(f, field, "{email} {username}"),
            other => panic!("expected validation error for {username}, got {other:?}"),
        }
    }

    create_user(&mut conn, registration("carol@example.com", "carol.b+c@d-e_f")).unwrap();
}

#[test]
fn change_password() {
    let mut conn = database::in_memory();
    let alice = test_user(&mut conn, "alice");
    let requester = Requester::User(alice.id);

    assert!(matches!(
        set_password(&mut conn, requester, "wrong", "new-secret"),
        Err(Error::Validation { .. })
    ));
    assert!(matches!(
        set_password(&mut conn, Requester::Anonymous, "hunter22", "new-secret"),
        Err(Error::Unauthenticated)
    ));

    set_password(&mut conn, requester, "hunter22", "new-secret").unwrap();
    let alice = get_user(&mut conn, alice.id).unwrap();
    assert!(check_password(&alice.password, "new-secret"));
}

#[test]
fn delete_missing_user() {
    let mut conn = database::in_memory();
    assert!(matches!(
        delete_user(&mut conn, UserId::from(12)),
        Err(Error::NotFound(_))
    ));
}
