use bot_commons::*;

fn main() {
    // `RUST_LOG`, from the environment or `.env`, overrides this.
    start_everything("warn,pixiv_proxy_bot=debug", pixiv_proxy_bot::entry());
}
