//! Account endpoints. Users are identified by email.

use serde::Serialize;

use super::types::User;
use crate::cache::{CacheUpdate, MutationContext, MutationEndpoint, QueryEndpoint, Request, Tag};

fn user_tags(users: &[User]) -> Vec<Tag> {
  let mut tags: Vec<Tag> = users.iter().map(|u| Tag::user(&u.email)).collect();
  tags.push(Tag::user_list());
  tags
}

pub struct GetAllUsers;

impl QueryEndpoint for GetAllUsers {
  const NAME: &'static str = "getAllUsers";
  type Args = ();
  type Output = Vec<User>;

  fn request(_: &()) -> Request {
    Request::get("/users")
  }

  fn provides(_: &(), users: &Vec<User>) -> Vec<Tag> {
    user_tags(users)
  }
}

/// Candidates for task assignment.
pub struct GetNonAdminUsers;

impl QueryEndpoint for GetNonAdminUsers {
  const NAME: &'static str = "getNonAdminUsers";
  type Args = ();
  type Output = Vec<User>;

  fn request(_: &()) -> Request {
    Request::get("/users/non-admin")
  }

  fn provides(_: &(), users: &Vec<User>) -> Vec<Tag> {
    user_tags(users)
  }
}

pub struct GetUserByEmail;

impl QueryEndpoint for GetUserByEmail {
  const NAME: &'static str = "getUserByEmail";
  type Args = String;
  type Output = User;

  fn request(email: &String) -> Request {
    Request::get(format!("/users/{}", email))
  }

  fn provides(email: &String, _: &User) -> Vec<Tag> {
    vec![Tag::user(email)]
  }
}

/// Profile edit. The body is the full user, email included.
pub struct UpdateUser;

impl MutationEndpoint for UpdateUser {
  const NAME: &'static str = "updateUser";
  type Args = User;
  type Response = User;

  fn request(user: &User) -> Request {
    Request::put(format!("/users/update/{}", user.email), user)
  }

  fn invalidates(user: &User) -> Vec<Tag> {
    vec![Tag::user(&user.email)]
  }

  fn optimistic(user: &User, _: &MutationContext) -> Vec<CacheUpdate> {
    vec![CacheUpdate::replace::<GetUserByEmail>(&user.email, user.clone())]
  }

  fn commit(user: &User, updated: &User, _: &MutationContext) -> Vec<CacheUpdate> {
    vec![CacheUpdate::replace::<GetUserByEmail>(&user.email, updated.clone())]
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordArgs {
  #[serde(skip)]
  pub email: String,
  pub current_password: String,
  pub new_password: String,
}

/// Touches no cached data.
pub struct ChangePassword;

impl MutationEndpoint for ChangePassword {
  const NAME: &'static str = "changePassword";
  type Args = ChangePasswordArgs;
  /// The server answers with a plain-text confirmation.
  type Response = String;

  fn request(args: &ChangePasswordArgs) -> Request {
    Request::put(format!("/users/change-password/{}", args.email), args)
  }

  fn invalidates(_: &ChangePasswordArgs) -> Vec<Tag> {
    Vec::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheClient, StoreConfig};
  use crate::error::ApiError;
  use crate::transport::fake::FakeTransport;
  use serde_json::json;

  fn ada(name: &str) -> User {
    User {
      email: "ada@example.com".into(),
      name: Some(name.into()),
      user_role: Some("USER".into()),
    }
  }

  #[test]
  fn test_list_provides_each_user_and_the_list() {
    let users = vec![ada("Ada"), User {
      email: "root@example.com".into(),
      name: None,
      user_role: Some("ADMIN".into()),
    }];
    let tags = GetAllUsers::provides(&(), &users);
    assert_eq!(tags, vec![
      Tag::user("ada@example.com"),
      Tag::user("root@example.com"),
      Tag::user_list(),
    ]);
    assert!(users[1].is_admin());
    assert!(!users[0].is_admin());
  }

  #[test]
  fn test_change_password_body_omits_email() {
    let req = ChangePassword::request(&ChangePasswordArgs {
      email: "ada@example.com".into(),
      current_password: "old".into(),
      new_password: "new".into(),
    });
    assert_eq!(req.path, "/users/change-password/ada@example.com");
    assert_eq!(
      req.body,
      Some(json!({"currentPassword": "old", "newPassword": "new"}))
    );
    assert!(ChangePassword::invalidates(&ChangePasswordArgs {
      email: "ada@example.com".into(),
      current_password: String::new(),
      new_password: String::new(),
    })
    .is_empty());
  }

  #[tokio::test]
  async fn test_update_refreshes_that_user_and_the_lists() {
    let transport = FakeTransport::new();
    transport.respond(
      "GET /users/ada@example.com",
      json!({"email": "ada@example.com", "name": "Ada", "userRole": "USER"}),
    );
    transport.respond(
      "GET /users",
      json!([{"email": "ada@example.com", "name": "Ada", "userRole": "USER"}]),
    );
    transport.respond(
      "GET /users/bob@example.com",
      json!({"email": "bob@example.com", "name": "Bob", "userRole": "USER"}),
    );
    transport.respond(
      "PUT /users/update/ada@example.com",
      json!({"email": "ada@example.com", "name": "Ada L.", "userRole": "USER"}),
    );
    let client = CacheClient::new(transport.clone(), StoreConfig::default());

    let mut ada_handle = client
      .use_query::<GetUserByEmail>("ada@example.com".into())
      .await
      .unwrap();
    let mut all = client.use_query::<GetAllUsers>(()).await.unwrap();
    let mut bob = client
      .use_query::<GetUserByEmail>("bob@example.com".into())
      .await
      .unwrap();
    ada_handle.settled().await.unwrap();
    all.settled().await.unwrap();
    bob.settled().await.unwrap();

    transport.respond(
      "GET /users/ada@example.com",
      json!({"email": "ada@example.com", "name": "Ada L.", "userRole": "USER"}),
    );
    let saved = client
      .use_mutation::<UpdateUser>()
      .trigger(ada("Ada L."))
      .await
      .unwrap();
    assert_eq!(saved.name.as_deref(), Some("Ada L."));

    let state = ada_handle.settled().await.unwrap();
    all.settled().await.unwrap();
    assert_eq!(state.data.unwrap().name.as_deref(), Some("Ada L."));
    assert_eq!(transport.count("GET /users/ada@example.com"), 2);
    assert_eq!(transport.count("GET /users"), 2);
    assert_eq!(transport.count("GET /users/bob@example.com"), 1);
  }

  #[tokio::test]
  async fn test_failed_update_restores_the_cached_user() {
    let transport = FakeTransport::new();
    transport.respond(
      "GET /users/ada@example.com",
      json!({"email": "ada@example.com", "name": "Ada", "userRole": "USER"}),
    );
    transport.fail(
      "PUT /users/update/ada@example.com",
      ApiError::Server {
        status: 400,
        message: "invalid".into(),
      },
    );
    let client = CacheClient::new(transport.clone(), StoreConfig::default());
    let mut handle = client
      .use_query::<GetUserByEmail>("ada@example.com".into())
      .await
      .unwrap();
    handle.settled().await.unwrap();

    let result = client.use_mutation::<UpdateUser>().trigger(ada("Ada L.")).await;
    assert!(result.is_err());
    let state = handle.settled().await.unwrap();
    assert_eq!(state.data.unwrap().name.as_deref(), Some("Ada"));
  }
}
