//! Output rendering and formatting

use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use console::style;
use pkgd_install::BatchResult;
use pkgd_registry::PackageSetting;
use serde::Serialize;
use std::io;

/// Registry summary shown by the status command
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStatus {
    pub packages: usize,
    pub disabled_system_packages: usize,
    pub shared_users: usize,
    pub schema_version: u32,
    pub poisoned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

/// Result of one CLI command, rendered as JSON or tables
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", content = "data", rename_all = "snake_case")]
pub enum OperationResult {
    Batch(BatchResult),
    PackageList(Vec<PackageSetting>),
    PackageInfo(Box<PackageSetting>),
    Status(RegistryStatus),
}

/// Output renderer for CLI results
#[derive(Clone)]
pub struct OutputRenderer {
    /// Use JSON output format
    json_output: bool,
    /// Whether styled output is enabled
    colors_enabled: bool,
}

impl OutputRenderer {
    /// Create new output renderer
    pub fn new(json_output: bool, colors_enabled: bool) -> Self {
        Self {
            json_output,
            colors_enabled,
        }
    }

    /// Render operation result
    pub fn render_result(&self, result: &OperationResult) -> io::Result<()> {
        if self.json_output {
            self.render_json(result)
        } else {
            self.render_table(result)
        }
    }

    /// Render as JSON
    fn render_json(&self, result: &OperationResult) -> io::Result<()> {
        let json = serde_json::to_string_pretty(result).map_err(io::Error::other)?;
        println!("{json}");
        Ok(())
    }

    /// Render as formatted output
    fn render_table(&self, result: &OperationResult) -> io::Result<()> {
        match result {
            OperationResult::Batch(batch) => self.render_batch(batch),
            OperationResult::PackageList(packages) => self.render_package_list(packages),
            OperationResult::PackageInfo(info) => self.render_package_info(info),
            OperationResult::Status(status) => self.render_status(status),
        }
    }

    fn render_batch(&self, batch: &BatchResult) -> io::Result<()> {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        table.set_header(vec![
            Cell::new("Package").add_attribute(Attribute::Bold),
            Cell::new("Result").add_attribute(Attribute::Bold),
            Cell::new("App ID").add_attribute(Attribute::Bold),
            Cell::new("Detail").add_attribute(Attribute::Bold),
        ]);

        for outcome in &batch.outcomes {
            let result_cell = if outcome.is_success() {
                let text = if outcome.update { "updated" } else { "installed" };
                self.colored_cell(text, Color::Green)
            } else {
                self.colored_cell(&format!("failed ({})", outcome.code), Color::Red)
            };
            let app_id = outcome
                .app_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string());

            table.add_row(vec![
                Cell::new(&outcome.package),
                result_cell,
                Cell::new(app_id),
                Cell::new(&outcome.message),
            ]);
        }

        println!("{table}");
        println!(
            "Batch {} {} in {:.1}s",
            batch.batch_id,
            if batch.succeeded() {
                "committed"
            } else {
                "aborted"
            },
            batch.duration.as_secs_f64()
        );
        Ok(())
    }

    fn render_package_list(&self, packages: &[PackageSetting]) -> io::Result<()> {
        if packages.is_empty() {
            println!("No packages installed.");
            return Ok(());
        }

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        table.set_header(vec![
            Cell::new("Package").add_attribute(Attribute::Bold),
            Cell::new("Version").add_attribute(Attribute::Bold),
            Cell::new("Code").add_attribute(Attribute::Bold),
            Cell::new("App ID").add_attribute(Attribute::Bold),
            Cell::new("Kind").add_attribute(Attribute::Bold),
        ]);

        for package in packages {
            table.add_row(vec![
                Cell::new(&package.name),
                Cell::new(package.version.to_string()),
                Cell::new(package.version_code.to_string()),
                Cell::new(package.app_id.to_string()),
                Cell::new(package_kind(package)),
            ]);
        }

        println!("{table}");
        Ok(())
    }

    fn render_package_info(&self, info: &PackageSetting) -> io::Result<()> {
        if self.colors_enabled {
            println!("{}", style(&info.name).bold());
        } else {
            println!("{}", info.name);
        }
        println!();

        println!("Version:      {} ({})", info.version, info.version_code);
        println!("App ID:       {}", info.app_id);
        println!("Target SDK:   {}", info.target_sdk);
        println!("Code path:    {}", info.code_path.display());
        println!("Kind:         {}", package_kind(info));

        if let Some(shared_user) = &info.shared_user {
            println!("Shared user:  {shared_user}");
        }
        if let Some(abi) = info.selected_abi {
            println!("ABI:          {abi}");
        }
        if let Some(initiator) = &info.install_source.initiating_package {
            println!("Installed by: {initiator}");
        }
        if let Some(decl) = &info.static_library {
            println!("Provides:     static library {} v{}", decl.name, decl.version);
        }
        if let Some(decl) = &info.sdk_library {
            println!(
                "Provides:     SDK library {} major {}",
                decl.name, decl.version_major
            );
        }

        if !info.uses_libraries.is_empty() {
            println!();
            println!("Uses libraries:");
            for dep in &info.uses_libraries {
                let suffix = if dep.optional { " (optional)" } else { "" };
                println!("  {} v{}{suffix}", dep.name, dep.version);
            }
        }

        println!();
        println!(
            "Installed:    {}",
            info.first_install_time.format("%Y-%m-%d %H:%M:%S UTC")
        );
        println!(
            "Updated:      {}",
            info.last_update_time.format("%Y-%m-%d %H:%M:%S UTC")
        );

        Ok(())
    }

    fn render_status(&self, status: &RegistryStatus) -> io::Result<()> {
        println!("Registry Status");
        println!();
        println!("Packages:        {}", status.packages);
        println!("Disabled system: {}", status.disabled_system_packages);
        println!("Shared users:    {}", status.shared_users);
        println!("Schema version:  {}", status.schema_version);
        if let Some(root) = &status.root {
            println!("Snapshot root:   {root}");
        } else {
            println!("Snapshot root:   (in memory)");
        }

        if status.poisoned {
            let message = "POISONED: a commit failed, restart required";
            if self.colors_enabled {
                println!("{}", style(message).red().bold());
            } else {
                println!("{message}");
            }
        }

        Ok(())
    }

    fn colored_cell(&self, text: &str, color: Color) -> Cell {
        if self.colors_enabled {
            Cell::new(text).fg(color)
        } else {
            Cell::new(text)
        }
    }
}

fn package_kind(package: &PackageSetting) -> &'static str {
    if package.static_library.is_some() {
        "static library"
    } else if package.sdk_library.is_some() {
        "sdk library"
    } else if package.system {
        "system"
    } else {
        "app"
    }
}
