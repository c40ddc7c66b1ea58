use std::{env, fs, path::PathBuf};

fn settings_args(cmd: clap::Command) -> clap::Command {
    cmd.arg(
        clap::arg!(--config <FILE> "Settings file (TOML)")
            .value_name("FILE")
            .value_parser(clap::value_parser!(PathBuf)),
    )
    .arg(
        clap::arg!(--"site-config" <DIR> "Site rules folder, searched before the configured ones")
            .value_name("DIR")
            .action(clap::ArgAction::Append)
            .value_parser(clap::value_parser!(PathBuf)),
    )
    .arg(clap::arg!(--"no-default-sites" "Do not search the default site rules folders"))
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=OUT_DIR");

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let completions_dir = out_dir.join("completions");

    fs::create_dir_all(&completions_dir).unwrap();

    let fetch = clap::Command::new("fetch")
        .about("Extract the content of a page")
        .arg(clap::arg!(<URL> "URL of the page"))
        .arg(clap::arg!(--html <FILE> "Use this HTML file for the first page instead of fetching it (\"-\" for stdin)"))
        .arg(
            clap::arg!(-o --output <DIR> "Save the bookmark and its archive in this directory")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            clap::arg!(-f --format <FORMAT> "Output format")
                .default_value("text")
                .value_parser(["html", "text", "json"]),
        )
        .arg(
            clap::arg!(--"denied-ip" <CIDR> "Refuse destinations in this network (CIDR), may be repeated")
                .action(clap::ArgAction::Append),
        );
    let resolve = clap::Command::new("resolve")
        .about("Show the merged site rules for a host")
        .arg(clap::arg!(<HOST> "Host name, e.g. `www.example.net`"));

    let mut cmd = clap::Command::new("scrapbook")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Extract and archive web pages")
        .arg(clap::arg!(-v --verbose "Enable debug logging").global(true))
        .subcommand(settings_args(fetch))
        .subcommand(settings_args(resolve))
        .subcommand(
            clap::Command::new("search")
                .about("Parse a search query and print its terms as JSON")
                .arg(clap::arg!(<QUERY> "Search query")),
        )
        .subcommand(
            clap::Command::new("completions")
                .about("Generate a shell completion script")
                .arg(clap::arg!(<SHELL> "Shell").value_parser(["bash", "zsh", "fish", "powershell", "elvish"])),
        );

    clap_complete::generate_to(clap_complete::shells::Bash, &mut cmd, "scrapbook", &completions_dir).unwrap();
    clap_complete::generate_to(clap_complete::shells::Zsh, &mut cmd, "scrapbook", &completions_dir).unwrap();
    clap_complete::generate_to(clap_complete::shells::Fish, &mut cmd, "scrapbook", &completions_dir).unwrap();
    clap_complete::generate_to(clap_complete::shells::PowerShell, &mut cmd, "scrapbook", &completions_dir).unwrap();

    println!("cargo:warning=Shell completions generated in: {}", completions_dir.display());
}
