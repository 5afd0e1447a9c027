use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};

use treescan::cli::Cli;
use treescan::finder::report::{format_disk_usage, format_elapsed, format_ranking};
use treescan::finder::Finder;

fn main() -> Result<()> {
    // 解析命令行参数
    let cli = Cli::parse();
    let start_time = Instant::now();

    // 初始化日志
    env_logger::Builder::new()
        .filter_level(if cli.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .init();

    cli.validate().context("无效的命令行参数")?;

    let (positional, roots) = cli.resolve_targets()?;
    let options = cli.build_options()?;
    let matcher = cli
        .build_matcher(positional.as_deref())
        .context("创建名称匹配器失败")?;
    debug!("匹配条件: {}", matcher.description());

    let finder = Finder::new(options)
        .with_matcher(matcher)
        .with_types(cli.build_types()?)
        .with_predicates(cli.build_predicates()?)
        .with_excludes(cli.build_excludes()?);

    let report = finder
        .run(&roots)
        .with_context(|| format!("扫描失败: {:?}", roots))?;
    info!("扫描完成，共 {} 个匹配条目", report.matched);

    // 汇总结果输出到标准输出
    let options = finder.options();
    if let Some(ranking) = options.ranking {
        print!("{}", format_ranking(ranking.metric, &report.ranking));
    } else if options.disk_usage {
        println!("{}", format_disk_usage(report.disk_usage_blocks, &report.roots));
    } else if options.count_only {
        println!("{}", report.matched);
    }

    if cli.timer {
        eprintln!("{}", format_elapsed(start_time.elapsed()));
    }
    if cli.stats {
        eprint!("{}", report.stats.render());
    }

    Ok(())
}
