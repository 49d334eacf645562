//! Server-side HTML for the public page, the login form and the dashboard.
//!
//! Pages are askama templates under `templates/`; every interpolated value is
//! HTML-escaped by the template engine.

use askama::Template;
use folio_auth::AdminIdentity;
use folio_contracts::{Achievement, BlogPost, Experience, ProfileDocument, Project, Skill};

use crate::mail::DeliveryFailure;

mod filters {
    /// Only http(s), mailto and site-relative links survive; anything else
    /// becomes `""` and the template omits the link.
    pub fn safe_href<T: std::fmt::Display>(raw: T) -> askama::Result<String> {
        let raw = raw.to_string();
        let raw = raw.trim();
        let allowed = raw.starts_with("https://")
            || raw.starts_with("http://")
            || raw.starts_with("mailto:")
            || (raw.starts_with('/') && !raw.starts_with("//"));
        Ok(if allowed {
            raw.to_string()
        } else {
            String::new()
        })
    }
}

#[derive(Template)]
#[template(path = "home.html")]
struct HomePage<'a> {
    doc: &'a ProfileDocument,
    image: &'a str,
    year: i32,
}

#[derive(Template)]
#[template(path = "login.html")]
struct LoginPage<'a> {
    error: Option<&'a str>,
}

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardPage<'a> {
    doc: &'a ProfileDocument,
    admin: &'a AdminIdentity,
    delivery_failure: Option<&'a DeliveryFailure>,
    image: &'a str,
    skills: Vec<Skill>,
    achievements: Vec<Achievement>,
    experience: Vec<Experience>,
    projects: Vec<Project>,
    blogs: Vec<BlogPost>,
}

pub fn home_page(doc: &ProfileDocument, year: i32) -> askama::Result<String> {
    HomePage {
        doc,
        image: doc.image_path.trim_start_matches('/'),
        year,
    }
    .render()
}

pub fn login_page(error: Option<&str>) -> askama::Result<String> {
    LoginPage { error }.render()
}

pub fn dashboard_page(
    doc: &ProfileDocument,
    admin: &AdminIdentity,
    delivery_failure: Option<&DeliveryFailure>,
) -> askama::Result<String> {
    DashboardPage {
        doc,
        admin,
        delivery_failure,
        image: doc.image_path.trim_start_matches('/'),
        skills: with_blank_row(&doc.skills),
        achievements: with_blank_row(&doc.achievements),
        experience: with_blank_row(&doc.experience),
        projects: with_blank_row(&doc.projects),
        blogs: with_blank_row(&doc.blogs),
    }
    .render()
}

/// Existing rows plus one empty row for adding an entry.
fn with_blank_row<T: Clone + Default>(items: &[T]) -> Vec<T> {
    let mut rows = Vec::with_capacity(items.len() + 1);
    rows.extend_from_slice(items);
    rows.push(T::default());
    rows
}
