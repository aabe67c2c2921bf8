use axum::response::Html;

const FORM_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Export your account</title>
</head>
<body>
  <h1>Export your account</h1>
  <p>Enter the username and email address of your account to download a
  signed archive of your data.</p>
  <form method="post" action="/export">
    <label>Username <input type="text" name="username" required></label><br>
    <label>Email <input type="email" name="email" required></label><br>
    <button type="submit">Download export</button>
  </form>
  <p>The server's public key is available at <a href="/publickey">/publickey</a>.</p>
</body>
</html>
"#;

pub async fn form_page() -> Html<&'static str> {
    Html(FORM_PAGE)
}
