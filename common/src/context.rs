fn get_prog_name() -> Option<String> {
    std::env::current_exe()
        .ok()?
        .file_name()?
        .to_str()?
        .to_owned()
        .into()
}

/// Name used as the server-side apply field manager and the HTTP user agent.
pub fn get_client_name() -> String {
    match get_prog_name() {
        Some(p) if p == "operator" => "loadbalancer-operator.infratographer.com".to_string(),
        _ => "infratographer.com".to_string(),
    }
}

pub fn get_short_name() -> String {
    let long = get_client_name();
    let lst = long.split('.').collect::<Vec<&str>>();
    if lst.len() > 2 {
        lst[0].to_string()
    } else {
        "loadbalancer-operator".to_string()
    }
}
