//! Project and membership endpoints.

use serde::de::IgnoredAny;
use serde::Serialize;

use super::query_param;
use super::types::{Project, ProjectMember, ProjectRole};
use crate::cache::{
  CacheUpdate, EntityKind, Method, MutationContext, MutationEndpoint, QueryEndpoint, Request, Tag,
};

pub struct GetProjects;

impl QueryEndpoint for GetProjects {
  const NAME: &'static str = "getProjects";
  type Args = ();
  type Output = Vec<Project>;

  fn request(_: &()) -> Request {
    Request::get("/api/projects")
  }

  fn provides(_: &(), projects: &Vec<Project>) -> Vec<Tag> {
    let mut tags: Vec<Tag> = projects.iter().map(|p| Tag::project(p.id)).collect();
    tags.push(Tag::project_list());
    tags
  }
}

pub struct GetProjectById;

impl QueryEndpoint for GetProjectById {
  const NAME: &'static str = "getProjectById";
  type Args = i64;
  type Output = Project;

  fn request(project_id: &i64) -> Request {
    Request::get(format!("/api/projects/{}", project_id))
  }

  fn provides(project_id: &i64, _: &Project) -> Vec<Tag> {
    vec![Tag::project(*project_id)]
  }
}

pub struct GetProjectMembers;

impl QueryEndpoint for GetProjectMembers {
  const NAME: &'static str = "getProjectMembers";
  type Args = i64;
  type Output = Vec<ProjectMember>;

  fn request(project_id: &i64) -> Request {
    Request::get(format!("/api/projects/{}/members", project_id))
  }

  fn provides(project_id: &i64, _: &Vec<ProjectMember>) -> Vec<Tag> {
    vec![Tag::project_members(*project_id)]
  }
}

/// The caller's role in a project. Changes with the project itself.
pub struct GetMyRole;

impl QueryEndpoint for GetMyRole {
  const NAME: &'static str = "getMyRoleInProject";
  type Args = i64;
  type Output = ProjectRole;

  fn request(project_id: &i64) -> Request {
    Request::get(format!("/api/projects/{}/my-role", project_id))
  }

  fn provides(project_id: &i64, _: &ProjectRole) -> Vec<Tag> {
    vec![Tag::project(*project_id)]
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewProject {
  pub name: String,
}

pub struct CreateProject;

impl MutationEndpoint for CreateProject {
  const NAME: &'static str = "createProject";
  type Args = NewProject;
  type Response = Project;

  fn request(args: &NewProject) -> Request {
    Request::post("/api/projects", args)
  }

  fn invalidates(_: &NewProject) -> Vec<Tag> {
    vec![Tag::all(EntityKind::Project)]
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectArgs {
  pub project_id: i64,
  pub name: String,
}

pub struct UpdateProject;

impl MutationEndpoint for UpdateProject {
  const NAME: &'static str = "updateProject";
  type Args = UpdateProjectArgs;
  type Response = Project;

  fn request(args: &UpdateProjectArgs) -> Request {
    Request::put(
      format!("/api/projects/{}", args.project_id),
      serde_json::json!({ "name": args.name }),
    )
  }

  fn invalidates(args: &UpdateProjectArgs) -> Vec<Tag> {
    vec![Tag::project(args.project_id), Tag::project_list()]
  }

  fn commit(args: &UpdateProjectArgs, updated: &Project, _: &MutationContext) -> Vec<CacheUpdate> {
    vec![CacheUpdate::replace::<GetProjectById>(&args.project_id, updated.clone())]
  }
}

/// Drops the project from the list while the delete is in flight. Every
/// cached project read is refreshed afterwards, the single-project ones too.
pub struct DeleteProject;

impl MutationEndpoint for DeleteProject {
  const NAME: &'static str = "deleteProject";
  type Args = i64;
  type Response = IgnoredAny;

  fn request(project_id: &i64) -> Request {
    Request::delete(format!("/api/projects/{}", project_id))
  }

  fn invalidates(_: &i64) -> Vec<Tag> {
    vec![Tag::all(EntityKind::Project)]
  }

  fn optimistic(project_id: &i64, _: &MutationContext) -> Vec<CacheUpdate> {
    let id = *project_id;
    vec![CacheUpdate::new::<GetProjects, _>(&(), move |projects| {
      projects.retain(|p| p.id != id)
    })]
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteMemberArgs {
  #[serde(skip)]
  pub project_id: i64,
  pub email: String,
  pub project_role: ProjectRole,
}

pub struct InviteMember;

impl MutationEndpoint for InviteMember {
  const NAME: &'static str = "inviteMember";
  type Args = InviteMemberArgs;
  type Response = ProjectMember;

  fn request(args: &InviteMemberArgs) -> Request {
    Request::post(format!("/api/projects/{}/members", args.project_id), args)
  }

  fn invalidates(args: &InviteMemberArgs) -> Vec<Tag> {
    vec![
      Tag::project_members(args.project_id),
      Tag::project(args.project_id),
    ]
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveMemberArgs {
  pub project_id: i64,
  pub email: String,
}

pub struct RemoveMember;

impl MutationEndpoint for RemoveMember {
  const NAME: &'static str = "removeMember";
  type Args = RemoveMemberArgs;
  type Response = IgnoredAny;

  fn request(args: &RemoveMemberArgs) -> Request {
    Request::delete(format!(
      "/api/projects/{}/members/{}",
      args.project_id, args.email
    ))
  }

  fn invalidates(args: &RemoveMemberArgs) -> Vec<Tag> {
    vec![
      Tag::project_members(args.project_id),
      Tag::project(args.project_id),
    ]
  }

  fn optimistic(args: &RemoveMemberArgs, _: &MutationContext) -> Vec<CacheUpdate> {
    let email = args.email.clone();
    vec![CacheUpdate::new::<GetProjectMembers, _>(&args.project_id, move |members| {
      members.retain(|m| m.email != email)
    })]
  }
}

/// Join a project through an emailed invite token. The token does not say
/// which project, so all project reads are refreshed.
pub struct AcceptInvite;

impl MutationEndpoint for AcceptInvite {
  const NAME: &'static str = "acceptInvite";
  type Args = String;
  type Response = IgnoredAny;

  fn request(token: &String) -> Request {
    Request {
      method: Method::Post,
      path: format!("/api/projects/accept-invite?{}", query_param("token", token)),
      body: None,
    }
  }

  fn invalidates(_: &String) -> Vec<Tag> {
    vec![Tag::all(EntityKind::Project)]
  }
}
