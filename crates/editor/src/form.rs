use std::collections::BTreeMap;

use folio_contracts::{Achievement, BlogPost, EditBatch, Experience, Project, Skill};

/// Field names posted by the dashboard form.
pub mod fields {
    pub const NAME: &str = "name";
    pub const TITLE: &str = "title";
    pub const SUBTITLE: &str = "subtitle";
    pub const HERO_TEXT: &str = "hero_text";
    pub const ABOUT_TEXT: &str = "about_text";
    pub const CONTACT_EMAIL: &str = "contact_email";
    pub const LINKEDIN: &str = "linkedin";
    pub const GITHUB: &str = "github";
    pub const IMAGE: &str = "image";

    pub const SKILL_NAME: &str = "skill_name";
    pub const SKILL_ICON: &str = "skill_icon";

    pub const ACHIEVEMENT_TITLE: &str = "achievements_title";
    pub const ACHIEVEMENT_DESC: &str = "achievements_desc";

    pub const EXP_YEAR: &str = "exp_year";
    pub const EXP_ROLE: &str = "exp_role";
    pub const EXP_COMPANY: &str = "exp_company";
    pub const EXP_DESCRIPTION: &str = "exp_description";

    pub const PROJ_NAME: &str = "proj_name";
    pub const PROJ_DESC: &str = "proj_desc";
    pub const PROJ_CODE: &str = "proj_code";
    pub const PROJ_DEMO: &str = "proj_demo";

    pub const BLOG_TITLE: &str = "blog_title";
    pub const BLOG_EXCERPT: &str = "blog_excerpt";
    pub const BLOG_CONTENT: &str = "blog_content";
    pub const BLOG_DATE: &str = "blog_date";
}

/// Multi-valued form submission: each field name maps to its values in the
/// order they were posted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFields {
    values: BTreeMap<String, Vec<String>>,
}

impl FormFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values
            .entry(name.into())
            .or_default()
            .push(value.into());
    }

    /// First value posted under `name`, or `""`.
    pub fn first(&self, name: &str) -> &str {
        self.all(name).first().map(String::as_str).unwrap_or("")
    }

    pub fn all(&self, name: &str) -> &[String] {
        self.values.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl<K, V> FromIterator<(K, V)> for FormFields
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut form = FormFields::new();
        for (name, value) in iter {
            form.push(name, value);
        }
        form
    }
}

/// Index-aligned view over the lists that make up one entity type.
///
/// The row count comes from the entity's required attribute. Any other list
/// may be shorter (or longer); missing cells read as `""`.
struct Rows<'a> {
    form: &'a FormFields,
    count: usize,
}

impl<'a> Rows<'a> {
    fn keyed_by(form: &'a FormFields, required: &str) -> Self {
        Self {
            form,
            count: form.all(required).len(),
        }
    }

    fn cell(&self, name: &str, index: usize) -> String {
        self.form.all(name).get(index).cloned().unwrap_or_default()
    }

    fn build<R>(&self, mut row: impl FnMut(&Self, usize) -> R) -> Vec<R> {
        (0..self.count).map(|i| row(self, i)).collect()
    }
}

/// Regroups a flat form submission into record objects.
///
/// Values are copied as posted; trimming and the required-field policies are
/// applied later by the reducer.
pub fn edit_batch_from_form(form: &FormFields) -> EditBatch {
    let skills = Rows::keyed_by(form, fields::SKILL_NAME).build(|rows, i| Skill {
        name: rows.cell(fields::SKILL_NAME, i),
        icon: rows.cell(fields::SKILL_ICON, i),
    });

    let achievements =
        Rows::keyed_by(form, fields::ACHIEVEMENT_TITLE).build(|rows, i| Achievement {
            title: rows.cell(fields::ACHIEVEMENT_TITLE, i),
            desc: rows.cell(fields::ACHIEVEMENT_DESC, i),
        });

    let experience = Rows::keyed_by(form, fields::EXP_YEAR).build(|rows, i| Experience {
        year: rows.cell(fields::EXP_YEAR, i),
        role: rows.cell(fields::EXP_ROLE, i),
        company: rows.cell(fields::EXP_COMPANY, i),
        description: rows.cell(fields::EXP_DESCRIPTION, i),
    });

    let projects = Rows::keyed_by(form, fields::PROJ_NAME).build(|rows, i| Project {
        name: rows.cell(fields::PROJ_NAME, i),
        desc: rows.cell(fields::PROJ_DESC, i),
        code: rows.cell(fields::PROJ_CODE, i),
        demo: rows.cell(fields::PROJ_DEMO, i),
    });

    let blogs = Rows::keyed_by(form, fields::BLOG_TITLE).build(|rows, i| BlogPost {
        title: rows.cell(fields::BLOG_TITLE, i),
        excerpt: rows.cell(fields::BLOG_EXCERPT, i),
        content: rows.cell(fields::BLOG_CONTENT, i),
        date: rows.cell(fields::BLOG_DATE, i),
    });

    EditBatch {
        name: form.first(fields::NAME).to_string(),
        title: form.first(fields::TITLE).to_string(),
        subtitle: form.first(fields::SUBTITLE).to_string(),
        hero_text: form.first(fields::HERO_TEXT).to_string(),
        about_text: form.first(fields::ABOUT_TEXT).to_string(),
        contact_email: form.first(fields::CONTACT_EMAIL).to_string(),
        linkedin: form.first(fields::LINKEDIN).to_string(),
        github: form.first(fields::GITHUB).to_string(),
        skills,
        achievements,
        experience,
        projects,
        blogs,
    }
}
