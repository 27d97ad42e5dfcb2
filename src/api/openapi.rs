use utoipa::{
    openapi::{Contact, License},
    OpenApi,
};

use super::handlers::{add_doctor, health, login, register, response, session};
use crate::{authority::Identity, token::Role};

#[derive(OpenApi)]
#[openapi(
    paths(
        add_doctor::add_doctor,
        health::health,
        login::login,
        register::register,
        session::session,
    ),
    components(schemas(
        add_doctor::AddDoctorRequest,
        health::Health,
        login::LoginRequest,
        register::RegisterRequest,
        response::ApiResponse,
        Identity,
        Role,
    )),
    tags(
        (name = "session", description = "Role login and token validation"),
        (name = "register", description = "Patient self-signup"),
        (name = "admin", description = "Operator-only account management"),
        (name = "health", description = "Liveness"),
    )
)]
struct ApiDoc;

/// Placeholder in handler paths that are mounted once per role.
const ROLE_SEGMENT: &str = "{role}";

/// `OpenAPI` document with info taken from Cargo metadata.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    expand_role_paths(&mut doc);
    doc.info.title = env!("CARGO_PKG_NAME").to_string();
    doc.info.version = env!("CARGO_PKG_VERSION").to_string();
    doc.info.description = optional_str(env!("CARGO_PKG_DESCRIPTION")).map(str::to_string);
    doc.info.contact = cargo_contact();
    doc.info.license = optional_str(env!("CARGO_PKG_LICENSE")).map(|identifier| {
        let mut license = License::new(identifier);
        license.identifier = Some(identifier.to_string());
        license
    });
    doc
}

/// The router mounts `/api/{role}/...` handlers at concrete paths, so list
/// each mounted path instead of the template.
fn expand_role_paths(doc: &mut utoipa::openapi::OpenApi) {
    let paths = std::mem::take(&mut doc.paths.paths);
    for (path, item) in paths {
        if !path.contains(ROLE_SEGMENT) {
            doc.paths.paths.insert(path, item);
            continue;
        }
        for role in Role::ALL {
            let mut item = item.clone();
            for operation in [&mut item.get, &mut item.post].into_iter().flatten() {
                operation.parameters = operation
                    .parameters
                    .take()
                    .map(|mut params| {
                        params.retain(|param| param.name != "role");
                        params
                    })
                    .filter(|params| !params.is_empty());
                if let Some(id) = operation.operation_id.as_mut() {
                    *id = format!("{role}_{id}");
                }
            }
            doc.paths
                .paths
                .insert(path.replace(ROLE_SEGMENT, &role.to_string()), item);
        }
    }
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let primary = env!("CARGO_PKG_AUTHORS").split(';').next().map(str::trim)?;
    let (name, email) = match primary.split_once('<') {
        Some((name, email)) => (name.trim(), email.trim_end_matches('>').trim()),
        None => (primary, ""),
    };
    if name.is_empty() && email.is_empty() {
        return None;
    }
    let mut contact = Contact::new();
    contact.name = optional_str(name).map(str::to_string);
    contact.email = optional_str(email).map(str::to_string);
    Some(contact)
}

fn optional_str(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
