//! HTML rendering of [`View`]s.

use crate::view::{DetectionPanel, Flash, Page, UserRow, View};
use axum::http::StatusCode;
use axum::response::Html;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use facemood_core::annotate::class_color;

const APP_TITLE: &str = "Face Emotion Detection App";

const STYLE: &str = r#"
body { margin: 0; font-family: sans-serif; color: #fff; background: #1e1e2a; display: flex; min-height: 100vh; }
body.bg { background-image: url("/background"); background-size: cover; background-repeat: no-repeat; background-attachment: fixed; }
aside { width: 220px; padding: 1.5rem 1rem; background: rgba(0, 0, 0, 0.6); }
aside select, aside button { width: 100%; padding: 0.4rem; border-radius: 8px; }
main { flex: 1; padding: 2rem; }
.hero { text-align: center; margin-top: 2rem; }
.hero h1 { font-size: 3rem; margin-bottom: 0.5rem; }
.hero h3 { color: #ffffffcc; margin-bottom: 1.5rem; }
.card { background-color: rgba(0, 0, 0, 0.5); padding: 2rem 3rem; border-radius: 20px; backdrop-filter: blur(10px); max-width: 450px; margin: 1rem auto; }
.card label { display: block; margin-top: 0.8rem; }
.card input[type=text], .card input[type=password] { width: 100%; box-sizing: border-box; background-color: rgba(255, 255, 255, 0.15); color: #fff; border-radius: 10px; padding: 0.5rem; border: none; }
.card button { margin-top: 1.2rem; padding: 0.5rem 1.5rem; border-radius: 10px; border: none; }
.upload { max-width: 400px; margin: 2rem auto; padding: 1rem; border: 2px dashed #fff; border-radius: 10px; background: rgba(255, 255, 255, 0.1); text-align: center; }
.upload:hover { background: rgba(255, 255, 255, 0.3); }
.flash { max-width: 600px; margin: 0.5rem auto; padding: 0.8rem 1rem; border-radius: 8px; }
.flash.success { background: rgba(33, 150, 83, 0.8); }
.flash.info { background: rgba(33, 120, 200, 0.8); }
.flash.warning { background: rgba(210, 150, 20, 0.85); }
.flash.error { background: rgba(200, 50, 50, 0.85); }
table { border-collapse: collapse; margin: 1rem 0; background: rgba(0, 0, 0, 0.5); }
th, td { padding: 0.4rem 0.9rem; border-bottom: 1px solid rgba(255, 255, 255, 0.2); text-align: left; }
td form { display: inline; }
figure { display: inline-block; margin: 0.5rem; max-width: 48%; }
figure img { max-width: 100%; border-radius: 8px; }
.swatch { display: inline-block; width: 0.8rem; height: 0.8rem; margin-right: 0.4rem; border-radius: 2px; }
"#;

/// Page-wide rendering switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Use the image served at `/background` behind every page.
    pub background: bool,
}

pub fn render(view: &View, options: &RenderOptions) -> Html<String> {
    let mut body = String::new();
    for flash in &view.flash {
        body.push_str(&flash_html(flash));
    }
    match &view.page {
        Page::Login => body.push_str(&credentials_form("Login", "/login")),
        Page::Register => body.push_str(&credentials_form("Register", "/register")),
        Page::Admin { users, pending } => body.push_str(&admin_html(users, pending)),
        Page::Detect { result } => body.push_str(&detect_html(result.as_ref())),
    }

    let sidebar = sidebar_html(view);
    Html(document(APP_TITLE, &sidebar, &body, options))
}

/// Standalone page for a failed request.
pub fn error_page(status: StatusCode, message: &str) -> Html<String> {
    let body = format!(
        "<div class=\"hero\"><h1>{}</h1></div>{}<p class=\"hero\"><a href=\"/\">Back</a></p>",
        status.as_u16(),
        flash_html(&Flash::Error(message.to_string()))
    );
    Html(document(APP_TITLE, "", &body, &RenderOptions::default()))
}

fn document(title: &str, sidebar: &str, body: &str, options: &RenderOptions) -> String {
    let body_class = if options.background { " class=\"bg\"" } else { "" };
    let sidebar = if sidebar.is_empty() {
        String::new()
    } else {
        format!("<aside>{sidebar}</aside>")
    };
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>{}</title><style>{STYLE}</style></head>\
         <body{body_class}>{sidebar}<main>{body}</main></body></html>",
        escape(title)
    )
}

fn sidebar_html(view: &View) -> String {
    match &view.account {
        Some((username, role)) => format!(
            "<p>Logged in as: <strong>{}</strong> ({})</p>\
             <form method=\"post\" action=\"/logout\"><button type=\"submit\">Logout</button></form>",
            escape(username),
            role
        ),
        None => {
            let register = matches!(view.page, Page::Register);
            format!(
                "<form method=\"get\" action=\"/\"><label for=\"menu\">Menu</label>\
                 <select id=\"menu\" name=\"menu\" onchange=\"this.form.submit()\">\
                 <option value=\"login\"{}>Login</option>\
                 <option value=\"register\"{}>Register</option></select>\
                 <noscript><button type=\"submit\">Go</button></noscript></form>",
                if register { "" } else { " selected" },
                if register { " selected" } else { "" },
            )
        }
    }
}

fn flash_html(flash: &Flash) -> String {
    let (class, text) = match flash {
        Flash::Success(t) => ("success", t),
        Flash::Info(t) => ("info", t),
        Flash::Warning(t) => ("warning", t),
        Flash::Error(t) => ("error", t),
    };
    format!("<div class=\"flash {class}\">{}</div>", escape(text))
}

fn credentials_form(title: &str, action: &str) -> String {
    format!(
        "<div class=\"hero\"><h1>{APP_TITLE}</h1><h3>{title}</h3></div>\
         <form class=\"card\" method=\"post\" action=\"{action}\">\
         <label for=\"username\">Username</label>\
         <input type=\"text\" id=\"username\" name=\"username\" autocomplete=\"username\">\
         <label for=\"password\">Password</label>\
         <input type=\"password\" id=\"password\" name=\"password\">\
         <button type=\"submit\">{title}</button></form>"
    )
}

fn admin_html(users: &[UserRow], pending: &[String]) -> String {
    let mut html = String::from("<h2>Admin Panel &ndash; User Management</h2>");

    if !users.is_empty() {
        html.push_str("<h3>All Users</h3><table><tr><th>Username</th><th>Role</th><th>Status</th></tr>");
        for user in users {
            html.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(&user.username),
                user.role,
                user.status
            ));
        }
        html.push_str("</table>");
    }

    html.push_str("<h3>Pending Approvals</h3>");
    if !pending.is_empty() {
        html.push_str("<table>");
        for username in pending {
            let name = escape(username);
            html.push_str(&format!(
                "<tr><td>{name}</td><td>\
                 <form method=\"post\" action=\"/admin/approve\">\
                 <input type=\"hidden\" name=\"username\" value=\"{name}\">\
                 <button type=\"submit\">Approve</button></form> \
                 <form method=\"post\" action=\"/admin/remove\">\
                 <input type=\"hidden\" name=\"username\" value=\"{name}\">\
                 <button type=\"submit\">Remove</button></form></td></tr>"
            ));
        }
        html.push_str("</table>");
    }
    html
}

fn detect_html(result: Option<&DetectionPanel>) -> String {
    let mut html = String::from(
        "<h3>Upload Image for Emotion Detection</h3>\
         <form class=\"upload\" method=\"post\" action=\"/detect\" enctype=\"multipart/form-data\">\
         <input type=\"file\" name=\"image\" accept=\".jpg,.jpeg,.png\">\
         <button type=\"submit\">Detect</button></form>",
    );

    let Some(panel) = result else {
        return html;
    };

    html.push_str(&format!(
        "<figure><img src=\"{}\" alt=\"Uploaded Image\"><figcaption>Uploaded Image</figcaption></figure>\
         <figure><img src=\"{}\" alt=\"Detection Results\"><figcaption>Detection Results</figcaption></figure>",
        png_data_uri(&panel.uploaded_png),
        png_data_uri(&panel.annotated_png)
    ));

    if !panel.detections.is_empty() {
        html.push_str(&format!(
            "<table><tr><th>Emotion</th><th>Confidence</th><th>Box ({}x{})</th></tr>",
            panel.width, panel.height
        ));
        for det in &panel.detections {
            let [r, g, b] = class_color(det.class_id);
            html.push_str(&format!(
                "<tr><td><span class=\"swatch\" style=\"background: rgb({r}, {g}, {b})\"></span>{}</td>\
                 <td>{:.1}%</td><td>{:.0}, {:.0}, {:.0}x{:.0}</td></tr>",
                escape(&det.label),
                det.confidence * 100.0,
                det.bbox.x,
                det.bbox.y,
                det.bbox.width,
                det.bbox.height
            ));
        }
        html.push_str("</table>");
    }
    html
}

fn png_data_uri(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

/// Escape text for use in HTML element content and quoted attributes.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use facemood_auth::Role;
    use facemood_core::{BoundingBox, Detection};

    fn html(view: &View) -> String {
        render(view, &RenderOptions::default()).0
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("<b>\"a\" & 'b'</b>"), "&lt;b&gt;&quot;a&quot; &amp; &#39;b&#39;&lt;/b&gt;");
        assert_eq!(escape("plain"), "plain");
    }

    #[test]
    fn test_login_page_has_form_and_menu() {
        let page = html(&View::new(Page::Login));
        assert!(page.contains("action=\"/login\""));
        assert!(page.contains("name=\"password\""));
        assert!(page.contains("<option value=\"login\" selected>"));
        assert!(!page.contains("Logout"));
    }

    #[test]
    fn test_register_page_selects_register() {
        let page = html(&View::new(Page::Register));
        assert!(page.contains("action=\"/register\""));
        assert!(page.contains("<option value=\"register\" selected>"));
    }

    #[test]
    fn test_flash_is_escaped() {
        let view = View::new(Page::Login).with_flash(Flash::Warning("<script>".into()));
        let page = html(&view);
        assert!(page.contains("class=\"flash warning\">&lt;script&gt;"));
        assert!(!page.contains("<script>"));
    }

    #[test]
    fn test_sidebar_for_logged_in_account() {
        let view = View::new(Page::Detect { result: None }).with_account(Some(("alice", Role::User)));
        let page = html(&view);
        assert!(page.contains("Logged in as: <strong>alice</strong> (user)"));
        assert!(page.contains("action=\"/logout\""));
        assert!(page.contains("enctype=\"multipart/form-data\""));
    }

    #[test]
    fn test_admin_page_lists_users_and_actions() {
        let view = View::new(Page::Admin {
            users: vec![
                UserRow { username: "root".into(), role: Role::Admin, status: "Approved" },
                UserRow { username: "alice".into(), role: Role::User, status: "Pending" },
            ],
            pending: vec!["alice".into()],
        });
        let page = html(&view);
        assert!(page.contains("<td>root</td><td>admin</td><td>Approved</td>"));
        assert!(page.contains("action=\"/admin/approve\""));
        assert!(page.contains("name=\"username\" value=\"alice\""));
    }

    #[test]
    fn test_detection_panel_embeds_images_and_table() {
        let panel = DetectionPanel {
            uploaded_png: vec![1, 2, 3],
            annotated_png: vec![4, 5, 6],
            width: 64,
            height: 48,
            detections: vec![Detection {
                class_id: 3,
                label: "happy".into(),
                confidence: 0.8,
                bbox: BoundingBox { x: 16.0, y: 12.0, width: 32.0, height: 24.0 },
            }],
        };
        let page = html(&View::new(Page::Detect { result: Some(panel) }));
        assert!(page.contains("data:image/png;base64,AQID"));
        assert!(page.contains("data:image/png;base64,BAUG"));
        assert!(page.contains("Detection Results"));
        assert!(page.contains("<td>80.0%</td>"));
        assert!(page.contains(">happy</td>"));
    }

    #[test]
    fn test_background_class() {
        let page = render(&View::new(Page::Login), &RenderOptions { background: true }).0;
        assert!(page.contains("<body class=\"bg\">"));
    }

    #[test]
    fn test_error_page() {
        let page = error_page(StatusCode::FORBIDDEN, "Admin access required.").0;
        assert!(page.contains("<h1>403</h1>"));
        assert!(page.contains("Admin access required."));
    }
}
