//! Extraction Pipeline
//!
//! Turns portal pages into a [`Snapshot`]. The portal only keeps one grade
//! panel open per page, so grades are read course by course, in order.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{id_selector, PortalDriver};
use crate::error::{Result, WatchError};
use crate::types::{Course, Snapshot};

pub const COURSE_LIST_ID: &str = "listaCursandoMaterias";
const GRADE_PANEL_BUTTON: &str = "i.fa-list-ol";

static COURSE_LIST: Lazy<Selector> = Lazy::new(|| selector(&id_selector(COURSE_LIST_ID)));
static LINK: Lazy<Selector> = Lazy::new(|| selector("a"));
static TBODY: Lazy<Selector> = Lazy::new(|| selector("tbody"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid built-in selector {:?}: {:?}", css, e))
}

/// Bounded waits used while reading the portal.
#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    /// Longest wait for any single element.
    pub wait_timeout: Duration,
    /// Pause between two reads when waiting for a table to settle.
    pub poll_interval: Duration,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(750),
        }
    }
}

/// Reads the enrolled-course list. Grades are left empty.
pub async fn extract_courses(driver: &mut dyn PortalDriver, opts: &ExtractOptions) -> Result<Snapshot> {
    info!("Fetching enrolled courses...");
    let html = driver
        .outer_html(&id_selector(COURSE_LIST_ID), opts.wait_timeout)
        .await?;

    let snapshot = Snapshot::from_courses(parse_course_list(&html));
    for course in &snapshot {
        info!("    {} --> {}", course.id, course.name);
    }
    Ok(snapshot)
}

/// Opens the course's grade panel and reads the first column of its table.
pub async fn extract_grades(
    driver: &mut dyn PortalDriver,
    course: &Course,
    opts: &ExtractOptions,
) -> Result<Vec<String>> {
    let button = format!("{} {}", id_selector(&course.id), GRADE_PANEL_BUTTON);
    driver.click(&button, opts.wait_timeout).await?;

    let table = id_selector(&course.grade_table_id());
    driver
        .outer_html(&format!("{} > tbody > tr", table), opts.wait_timeout)
        .await?;

    let html = wait_until_stable(driver, &table, opts).await?;
    Ok(parse_grade_table(&html))
}

/// Full snapshot: course list, then each course's grades in list order.
pub async fn extract_snapshot(driver: &mut dyn PortalDriver, opts: &ExtractOptions) -> Result<Snapshot> {
    let listed = extract_courses(driver, opts).await?;

    info!("Fetching grades...");
    let mut courses = Vec::with_capacity(listed.len());
    for course in &listed {
        let grades = extract_grades(driver, course, opts).await?;
        debug!(id = %course.id, ?grades, "Read grade table");
        courses.push(course.clone().with_grades(grades));
    }

    info!(courses = courses.len(), "Grades fetched");
    Ok(Snapshot::from_courses(courses))
}

/// Re-reads `selector` until two consecutive reads match.
///
/// The portal fills grade tables asynchronously after the panel opens.
async fn wait_until_stable(
    driver: &mut dyn PortalDriver,
    selector: &str,
    opts: &ExtractOptions,
) -> Result<String> {
    let deadline = Instant::now() + opts.wait_timeout;
    let mut previous = driver.outer_html(selector, opts.wait_timeout).await?;

    loop {
        tokio::time::sleep(opts.poll_interval).await;
        let current = driver.outer_html(selector, opts.wait_timeout).await?;
        if current == previous {
            return Ok(current);
        }
        if Instant::now() >= deadline {
            return Err(WatchError::timeout(selector));
        }
        previous = current;
    }
}

fn normalize(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

fn first_text(element: ElementRef) -> Option<String> {
    element.text().map(normalize).find(|t| !t.is_empty())
}

/// Parses the `#listaCursandoMaterias` container. Children without an id
/// cannot be opened and are skipped.
pub fn parse_course_list(html: &str) -> Vec<Course> {
    let fragment = Html::parse_fragment(html);
    let Some(list) = fragment.select(&COURSE_LIST).next() else {
        return vec![];
    };

    list.children()
        .filter_map(ElementRef::wrap)
        .filter_map(|item| {
            let id = item.value().id()?.to_string();
            let name = item
                .select(&LINK)
                .next()
                .and_then(first_text)
                .unwrap_or_else(|| id.clone());
            Some(Course::new(id, name))
        })
        .collect()
}

/// First-column text of every body row. A first cell spanning several rows
/// is repeated for each of them.
pub fn parse_grade_table(html: &str) -> Vec<String> {
    let fragment = Html::parse_fragment(html);
    let Some(tbody) = fragment.select(&TBODY).next() else {
        return vec![];
    };

    let mut grades = Vec::new();
    let mut spanned: Option<(String, usize)> = None;

    for row in tbody
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "tr")
    {
        if let Some((value, remaining)) = spanned.as_mut() {
            if *remaining > 0 {
                grades.push(value.clone());
                *remaining -= 1;
                continue;
            }
        }
        spanned = None;

        let Some(cell) = row
            .children()
            .filter_map(ElementRef::wrap)
            .find(|c| matches!(c.value().name(), "td" | "th"))
        else {
            continue;
        };

        let value = normalize(&cell.text().collect::<String>());
        let rowspan = cell
            .value()
            .attr("rowspan")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or(1);
        if rowspan > 1 {
            spanned = Some((value.clone(), rowspan - 1));
        }
        grades.push(value);
    }

    grades
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::{LoginForm, Navigation};
    use crate::types::SessionCookie;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};

    /// Serves queued HTML per selector; the last entry repeats forever.
    #[derive(Default)]
    struct PageDriver {
        pages: HashMap<String, VecDeque<String>>,
        clicks: Vec<String>,
    }

    impl PageDriver {
        fn serve(&mut self, selector: &str, versions: &[&str]) {
            self.pages.insert(
                selector.to_string(),
                versions.iter().map(|s| s.to_string()).collect(),
            );
        }
    }

    #[async_trait]
    impl PortalDriver for PageDriver {
        async fn set_cookies(&mut self, _cookies: &[SessionCookie]) -> Result<()> {
            Ok(())
        }

        async fn navigate(&mut self, url: &str) -> Result<Navigation> {
            Ok(Navigation {
                status: 200,
                final_url: url.to_string(),
            })
        }

        async fn submit_login(&mut self, _form: LoginForm<'_>) -> Result<Vec<SessionCookie>> {
            Ok(vec![])
        }

        async fn click(&mut self, selector: &str, _timeout: Duration) -> Result<()> {
            self.clicks.push(selector.to_string());
            Ok(())
        }

        async fn outer_html(&mut self, selector: &str, _timeout: Duration) -> Result<String> {
            let versions = self
                .pages
                .get_mut(selector)
                .ok_or_else(|| WatchError::timeout(selector))?;
            if versions.len() > 1 {
                Ok(versions.pop_front().unwrap_or_default())
            } else {
                versions.front().cloned().ok_or_else(|| WatchError::timeout(selector))
            }
        }

        async fn close(self: Box<Self>) {}
    }

    const COURSE_LIST_HTML: &str = r##"
        <ul id="listaCursandoMaterias" class="list-group">
            <li id="idCurso101" class="list-group-item">
                <a href="#">  Análisis   Matemático I <i class="fa fa-list-ol"></i></a>
            </li>
            <li class="divider"></li>
            <li id="idCurso102" class="list-group-item">
                <a href="#"><span>Física I</span></a>
            </li>
            <li id="idCurso103" class="list-group-item">Sin enlace</li>
        </ul>
    "##;

    fn table(id: &str, rows: &[&str]) -> String {
        let body: String = rows
            .iter()
            .map(|r| format!("<tr><td>{}</td><td>Aprobado</td></tr>", r))
            .collect();
        format!(r#"<table id="{}"><thead><tr><th>Nota</th></tr></thead><tbody>{}</tbody></table>"#, id, body)
    }

    #[test]
    fn test_parse_course_list() {
        let courses = parse_course_list(COURSE_LIST_HTML);
        assert_eq!(
            courses,
            vec![
                Course::new("idCurso101", "Análisis Matemático I"),
                Course::new("idCurso102", "Física I"),
                Course::new("idCurso103", "idCurso103"),
            ]
        );
    }

    #[test]
    fn test_parse_course_list_without_container() {
        assert!(parse_course_list("<div id=\"other\"></div>").is_empty());
    }

    #[test]
    fn test_parse_grade_table_first_column() {
        let html = table("tabla101", &["  7 ", "Ausente", "9&nbsp;(nueve)"]);
        assert_eq!(parse_grade_table(&html), vec!["7", "Ausente", "9 (nueve)"]);
    }

    #[test]
    fn test_parse_grade_table_rowspan() {
        let html = r#"
            <table id="tabla5"><tbody>
                <tr><td rowspan="2">Parcial 1</td><td>4</td></tr>
                <tr><td>8</td></tr>
                <tr><td>Final</td><td>9</td></tr>
                <tr></tr>
            </tbody></table>
        "#;
        assert_eq!(parse_grade_table(html), vec!["Parcial 1", "Parcial 1", "Final"]);
    }

    #[test]
    fn test_parse_empty_table() {
        assert!(parse_grade_table("<table id=\"tabla1\"></table>").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_extract_snapshot_reads_courses_in_order() {
        let mut driver = PageDriver::default();
        driver.serve(&id_selector(COURSE_LIST_ID), &[COURSE_LIST_HTML]);
        for (course, grades) in [("101", vec!["7"]), ("102", vec!["4", "6"]), ("103", vec![])] {
            let id = format!("tabla{}", course);
            driver.serve(&format!("{} > tbody > tr", id_selector(&id)), &["<tr></tr>"]);
            let html = table(&id, &grades);
            driver.serve(&id_selector(&id), &[html.as_str()]);
        }

        let snapshot = extract_snapshot(&mut driver, &ExtractOptions::default())
            .await
            .unwrap();

        let grades: Vec<_> = snapshot.iter().map(|c| c.grades.clone()).collect();
        assert_eq!(grades, vec![vec!["7"], vec!["4", "6"], vec![]]);
        assert_eq!(
            driver.clicks,
            vec![
                "[id=\"idCurso101\"] i.fa-list-ol",
                "[id=\"idCurso102\"] i.fa-list-ol",
                "[id=\"idCurso103\"] i.fa-list-ol",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_stable_returns_settled_table() {
        let mut driver = PageDriver::default();
        let partial = table("tabla1", &["7"]);
        let full = table("tabla1", &["7", "9"]);
        driver.serve("#t", &[partial.as_str(), full.as_str(), full.as_str()]);

        let html = wait_until_stable(&mut driver, "#t", &ExtractOptions::default())
            .await
            .unwrap();
        assert_eq!(parse_grade_table(&html), vec!["7", "9"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_table_that_never_settles_times_out() {
        let mut driver = PageDriver::default();
        let versions: Vec<String> = (0..200).map(|i| table("tabla1", &[&i.to_string()])).collect();
        let refs: Vec<&str> = versions.iter().map(String::as_str).collect();
        driver.serve("#t", &refs);

        let opts = ExtractOptions {
            wait_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(500),
        };
        let err = wait_until_stable(&mut driver, "#t", &opts).await.unwrap_err();
        assert!(matches!(err, WatchError::ExtractionTimeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_grade_table_aborts_extraction() {
        let mut driver = PageDriver::default();
        driver.serve(&id_selector(COURSE_LIST_ID), &[COURSE_LIST_HTML]);

        let err = extract_snapshot(&mut driver, &ExtractOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::ExtractionTimeout { .. }));
    }
}
